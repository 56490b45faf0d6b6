//! Punchpass wallet pass library
//!
//! Everything needed to turn a loyalty card into a signed `.pkpass` bundle:
//! - `pass.json` model and field layout
//! - Artwork scaling, fallback art, and the stamp-grid hero image
//! - SHA-1 manifest and detached signing through an external tool
//! - Stored ZIP archive writer

pub mod archive;
pub mod artwork;
pub mod bundle;
pub mod color;
pub mod error;
pub mod fetch;
pub mod hero;
pub mod manifest;
pub mod payload;
pub mod signer;

pub use bundle::{PKPASS_MIME, PassBundle, PassBundleBuilder, SigningMaterial, WalletPassDescriptor};
pub use error::{FetchError, PassError, SignError, SignStep};
pub use fetch::{ImageFetcher, NoImages};
pub use signer::{OpenSslSigner, Signer};
