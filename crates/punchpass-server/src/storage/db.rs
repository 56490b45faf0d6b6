//! SQLite database for the Punchpass server.

punchpass_core::define_database!(ServerDatabase, "Server database migrations complete");
