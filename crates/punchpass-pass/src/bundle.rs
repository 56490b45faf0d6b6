//! Wallet pass bundle assembly.
//!
//! Builds `pass.json` and artwork for a loyalty card, hashes everything into
//! `manifest.json`, obtains a detached signature over the manifest, and packs
//! the lot into a `.pkpass` archive.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use image::RgbaImage;
use tracing::{debug, info, instrument, warn};

use crate::archive::ArchiveWriter;
use crate::artwork::{Align, decode, encode_png, fallback_art, fit_within};
use crate::color::Palette;
use crate::error::{PassError, SignError, SignStep};
use crate::fetch::ImageFetcher;
use crate::manifest::Manifest;
use crate::payload::{Barcode, Field, PassPayload, StoreCard, notification_field};
use crate::signer::Signer;

/// MIME type of a pass bundle.
pub const PKPASS_MIME: &str = "application/vnd.apple.pkpass";

/// Artwork slots: (file name, width, height, alignment).
const ICON: (&str, u32, u32, Align) = ("icon.png", 58, 58, Align::Center);
const ICON_2X: (&str, u32, u32, Align) = ("icon@2x.png", 116, 116, Align::Center);
const LOGO: (&str, u32, u32, Align) = ("logo.png", 320, 100, Align::TopLeft);
const STRIP: (&str, u32, u32, Align) = ("strip.png", 624, 196, Align::Center);

/// Certificate material and identifiers shared by every pass.
#[derive(Debug, Clone)]
pub struct SigningMaterial {
    /// PKCS#12 container holding the pass-type certificate and key.
    pub p12_path: PathBuf,
    pub p12_password: String,
    /// Optional Apple WWDR intermediate appended to the extracted chain.
    pub wwdr_certificate: Option<PathBuf>,
    pub team_identifier: String,
    pub pass_type_identifier: String,
    pub organization_name: String,
}

/// Everything a pass shows about one loyalty card.
#[derive(Debug, Clone, Default)]
pub struct WalletPassDescriptor {
    pub card_id: String,
    pub serial_number: Option<String>,
    pub barcode_value: Option<String>,
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub business_name: String,
    pub program_name: Option<String>,
    pub stamp_count: i64,
    pub max_points: i64,
    pub rewards_earned: i64,
    pub card_color: Option<String>,
    pub logo_url: Option<String>,
    pub strip_url: Option<String>,
    pub authentication_token: Option<String>,
    pub web_service_url: Option<String>,
    pub notification_title: Option<String>,
    pub notification_message: Option<String>,
}

impl WalletPassDescriptor {
    /// `(stamps, max)` with `max >= 1` and `0 <= stamps <= max`.
    pub fn progress(&self) -> (i64, i64) {
        let max = self.max_points.max(1);
        (self.stamp_count.clamp(0, max), max)
    }

    /// Explicit serial, else the card id, else a fresh random token.
    pub fn resolve_serial(&self) -> String {
        [self.serial_number.as_deref(), Some(self.card_id.as_str())]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
            .map_or_else(|| uuid::Uuid::new_v4().simple().to_string(), str::to_string)
    }

    fn display_name(&self) -> &str {
        non_empty(self.program_name.as_deref()).unwrap_or(&self.business_name)
    }
}

fn non_empty(v: Option<&str>) -> Option<&str> {
    v.map(str::trim).filter(|s| !s.is_empty())
}

/// A finished bundle.
#[derive(Debug, Clone)]
pub struct PassBundle {
    pub serial_number: String,
    /// Suggested download name, e.g. `bean-there-card-42.pkpass`.
    pub file_name: String,
    /// Bundle entries in archive order.
    pub entries: Vec<(String, Vec<u8>)>,
    /// The packed `.pkpass` bytes.
    pub archive: Vec<u8>,
}

impl PassBundle {
    pub fn entry(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, data)| data.as_slice())
    }

    pub const fn mime_type(&self) -> &'static str {
        PKPASS_MIME
    }
}

/// Lowercase ASCII slug; runs of other characters collapse to one `-`.
pub fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Suggested file name for a bundle.
pub fn bundle_file_name(display_name: &str, serial: &str) -> String {
    let name = slugify(display_name);
    let serial = slugify(serial);
    match (name.is_empty(), serial.is_empty()) {
        (false, false) => format!("{name}-{serial}.pkpass"),
        (false, true) => format!("{name}.pkpass"),
        (true, false) => format!("{serial}.pkpass"),
        (true, true) => "pass.pkpass".to_string(),
    }
}

/// Assembles and signs pass bundles.
pub struct PassBundleBuilder {
    material: SigningMaterial,
    signer: Arc<dyn Signer>,
    images: Arc<dyn ImageFetcher>,
    scratch_root: Option<PathBuf>,
}

impl PassBundleBuilder {
    pub fn new(
        material: SigningMaterial,
        signer: Arc<dyn Signer>,
        images: Arc<dyn ImageFetcher>,
    ) -> Self {
        Self {
            material,
            signer,
            images,
            scratch_root: None,
        }
    }

    /// Create signing scratch directories under `root` instead of the
    /// system temp directory.
    #[must_use]
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    pub const fn material(&self) -> &SigningMaterial {
        &self.material
    }

    /// Build a signed bundle for `desc`.
    #[instrument(skip(self, desc), fields(card_id = %desc.card_id))]
    pub async fn build(&self, desc: &WalletPassDescriptor) -> Result<PassBundle, PassError> {
        if !tokio::fs::try_exists(&self.material.p12_path)
            .await
            .unwrap_or(false)
        {
            return Err(PassError::MissingCertificate(self.material.p12_path.clone()));
        }
        let serial = desc.resolve_serial();

        let palette = Palette::resolve(desc.card_color.as_deref());
        let payload = self.build_payload(desc, &serial, palette);
        let pass_json = serde_json::to_vec(&payload)?;

        let mut entries: Vec<(String, Vec<u8>)> = vec![("pass.json".to_string(), pass_json)];
        entries.extend(self.render_artwork(desc, palette).await?);

        let manifest = Manifest::from_files(entries.iter().map(|(n, d)| (n.as_str(), d.as_slice())));
        let manifest_json = manifest.to_json()?;
        let signature = self.sign(&manifest_json).await?;

        entries.push(("manifest.json".to_string(), manifest_json));
        entries.push(("signature".to_string(), signature));

        let mut writer = ArchiveWriter::new(Utc::now().naive_utc());
        for (name, data) in &entries {
            writer.add(name, data.clone());
        }
        let archive = writer.finish();

        info!(serial = %serial, size = archive.len(), "Pass bundle built");

        Ok(PassBundle {
            file_name: bundle_file_name(desc.display_name(), &serial),
            serial_number: serial,
            entries,
            archive,
        })
    }

    /// The `pass.json` payload for `desc`.
    pub fn build_payload(
        &self,
        desc: &WalletPassDescriptor,
        serial: &str,
        palette: Palette,
    ) -> PassPayload {
        let (stamps, max) = desc.progress();
        let barcode = non_empty(desc.barcode_value.as_deref()).unwrap_or(&desc.card_id);

        let mut back_fields = Vec::new();
        if let Some(name) = non_empty(Some(&desc.customer_name)) {
            back_fields.push(Field::text("member", "Member", name));
        }
        if let Some(email) = non_empty(desc.customer_email.as_deref()) {
            back_fields.push(Field::text("email", "Email", email));
        }
        back_fields.extend(notification_field(
            desc.notification_title.as_deref(),
            desc.notification_message.as_deref(),
        ));

        // Registration without a token is useless, so both or neither.
        let (authentication_token, web_service_url) = match (
            non_empty(desc.authentication_token.as_deref()),
            non_empty(desc.web_service_url.as_deref()),
        ) {
            (Some(token), Some(url)) => (Some(token.to_string()), Some(url.to_string())),
            _ => (None, None),
        };

        PassPayload {
            format_version: 1,
            pass_type_identifier: self.material.pass_type_identifier.clone(),
            serial_number: serial.to_string(),
            team_identifier: self.material.team_identifier.clone(),
            organization_name: self.material.organization_name.clone(),
            description: format!("{} loyalty card", desc.display_name()),
            logo_text: desc.business_name.clone(),
            background_color: palette.background.css(),
            foreground_color: palette.foreground.css(),
            label_color: palette.foreground.css(),
            barcodes: vec![Barcode::qr(barcode)],
            store_card: StoreCard {
                header_fields: vec![Field::text("business", "Business", &desc.business_name)],
                auxiliary_fields: vec![
                    Field::text("stamps", "Stamps", format!("{stamps}/{max}")),
                    Field::number("rewards", "Rewards", desc.rewards_earned.max(0)),
                ],
                back_fields,
            },
            authentication_token,
            web_service_url,
        }
    }

    async fn render_artwork(
        &self,
        desc: &WalletPassDescriptor,
        palette: Palette,
    ) -> Result<Vec<(String, Vec<u8>)>, PassError> {
        let strip_url = non_empty(desc.strip_url.as_deref());
        let (logo, strip) = tokio::join!(
            self.load_image(non_empty(desc.logo_url.as_deref())),
            self.load_image(strip_url),
        );

        let mut slots = vec![(ICON, logo.as_ref()), (ICON_2X, logo.as_ref()), (LOGO, logo.as_ref())];
        if strip_url.is_some() {
            slots.push((STRIP, strip.as_ref()));
        }

        let mut out = Vec::with_capacity(slots.len());
        for ((name, width, height, align), source) in slots {
            let img = source.map_or_else(
                || fallback_art(width, height, palette),
                |src| fit_within(src, width, height, align),
            );
            out.push((name.to_string(), encode_png(&img)?));
        }
        Ok(out)
    }

    /// Fetch and decode an image; any failure yields `None` so callers
    /// substitute fallback art.
    async fn load_image(&self, location: Option<&str>) -> Option<RgbaImage> {
        let location = location?;
        let bytes = match self.images.fetch(location).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(location, error = %e, "Image fetch failed, using fallback art");
                return None;
            }
        };
        match decode(&bytes) {
            Ok(img) => Some(img),
            Err(e) => {
                warn!(location, error = %e, "Image decode failed, using fallback art");
                None
            }
        }
    }

    /// Produce a DER detached signature over `manifest_json`.
    ///
    /// The scratch directory is removed when it goes out of scope, on every
    /// return path.
    async fn sign(&self, manifest_json: &[u8]) -> Result<Vec<u8>, PassError> {
        let mut scratch = tempfile::Builder::new();
        scratch.prefix("punchpass-sign-");
        let scratch = match &self.scratch_root {
            Some(root) => scratch.tempdir_in(root)?,
            None => scratch.tempdir()?,
        };
        let dir = scratch.path();

        let manifest = dir.join("manifest.json");
        let cert = dir.join("certificate.pem");
        let key = dir.join("key.pem");
        let chain = dir.join("chain.pem");
        let signature = dir.join("signature");

        tokio::fs::write(&manifest, manifest_json).await?;

        let p12 = &self.material.p12_path;
        let password = &self.material.p12_password;
        self.signer.extract_certificate(p12, password, &cert).await?;
        self.signer.extract_key(p12, password, &key).await?;
        self.signer.extract_chain(p12, password, &chain).await?;
        let has_chain = self.append_wwdr(&chain).await?;

        self.signer
            .sign_detached(
                &manifest,
                &cert,
                &key,
                has_chain.then_some(chain.as_path()),
                &signature,
            )
            .await?;

        let bytes = tokio::fs::read(&signature)
            .await
            .map_err(|e| SignError::Io {
                step: SignStep::SignDetached,
                message: e.to_string(),
            })?;
        debug!(size = bytes.len(), "Manifest signed");
        Ok(bytes)
    }

    /// Append the WWDR intermediate (if configured) to the chain file.
    /// Returns whether the chain holds any certificate material. A chain
    /// file the signer never wrote counts as empty.
    async fn append_wwdr(&self, chain: &Path) -> Result<bool, PassError> {
        let mut pem = match tokio::fs::read(chain).await {
            Ok(pem) => pem,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(SignError::Io {
                    step: SignStep::ExtractChain,
                    message: format!("{}: {e}", chain.display()),
                }
                .into());
            }
        };
        if let Some(wwdr) = &self.material.wwdr_certificate {
            let extra = tokio::fs::read(wwdr).await.map_err(|e| {
                PassError::Config(format!("WWDR certificate {}: {e}", wwdr.display()))
            })?;
            if !pem.is_empty() && !pem.ends_with(b"\n") {
                pem.push(b'\n');
            }
            pem.extend_from_slice(&extra);
            tokio::fs::write(chain, &pem).await?;
        }
        Ok(pem.iter().any(|b| !b.is_ascii_whitespace()))
    }
}
