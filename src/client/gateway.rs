//! The RPC-shaped boundary to the upstream marketplace.
//!
//! [`RawGateway`] is the seam between the session logic and the wire: the
//! authentication handshake plus the logical marketplace calls. The session
//! and the tests only ever see this trait. [`HttpGateway`] is the production
//! binding, a JSON client against the configured gateway endpoint that
//! persists its session token per account index so restarts skip the login
//! flow.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{BotError, Result};

/// Addressee of a purchase invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvoicePeer {
    /// Bill the purchase to the buying account itself.
    #[serde(rename = "self")]
    Myself,
    /// Address the seller directly via the captured access hash.
    Owner { user_id: i64, access_hash: i64 },
}

/// Invoice reference for the resale purchase flow.
#[derive(Debug, Clone, Serialize)]
pub struct ResaleInvoice {
    pub slug: String,
    pub to: InvoicePeer,
    /// Settle in TON rather than stars.
    pub ton: bool,
}

/// Payment form handed back by the upstream before submission. Only
/// recognized `kind`s may be submitted.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentForm {
    pub form_id: i64,
    pub kind: String,
}

/// Result of submitting a stars form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Success,
    /// The upstream wants an out-of-band confirmation at the given URL;
    /// surfaced to callers as a failure.
    VerificationNeeded(String),
    Unknown(String),
}

/// Raw catalog entry.
#[derive(Debug, Clone, Deserialize)]
pub struct RawGiftType {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub store_price: i64,
    #[serde(default)]
    pub total_supply: Option<i32>,
    #[serde(default)]
    pub remaining_supply: Option<i32>,
}

/// Catalog page; `not_modified` means the caller's hash is current and
/// `gifts` is empty.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogPage {
    #[serde(default)]
    pub not_modified: bool,
    #[serde(default)]
    pub gifts: Vec<RawGiftType>,
}

/// One attribute of a resale listing.
#[derive(Debug, Clone, Deserialize)]
pub struct RawAttribute {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub rarity_per_mille: i32,
}

/// Raw resale listing.
#[derive(Debug, Clone, Deserialize)]
pub struct RawListing {
    pub id: i64,
    pub num: i64,
    pub slug: String,
    #[serde(default)]
    pub owner_id: i64,
    /// Primary-currency ask; zero when the unit is TON-only.
    #[serde(default)]
    pub star_price: i64,
    /// Secondary-currency ask in nanoton.
    #[serde(default)]
    pub ton_price_nano: i64,
    #[serde(default)]
    pub attributes: Vec<RawAttribute>,
}

/// Seller record accompanying a resale page, keyed by owner id.
#[derive(Debug, Clone, Deserialize)]
pub struct RawSeller {
    pub id: i64,
    pub access_hash: i64,
}

/// One page of resale listings, price ascending.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResalePage {
    #[serde(default)]
    pub listings: Vec<RawListing>,
    #[serde(default)]
    pub sellers: Vec<RawSeller>,
    #[serde(default)]
    pub next_offset: String,
}

/// The upstream wire interface. Only the logical operations matter; the
/// session drives this through its state machine and wraps every call in the
/// RPC deadline.
#[async_trait]
pub trait RawGateway: Send + Sync {
    /// Establish the wire connection.
    async fn connect(&self) -> Result<()>;

    /// Whether the persisted session is still accepted by the upstream.
    async fn is_authorized(&self) -> Result<bool>;

    /// Run the login flow and persist the resulting session.
    async fn sign_in(&self, phone: &str, password: &str) -> Result<()>;

    /// Gift-type catalog keyed by the caller's catalog hash.
    async fn catalog(&self, catalog_hash: i64) -> Result<CatalogPage>;

    /// Resale listings of one gift type, price ascending.
    async fn resale_listings(
        &self,
        gift_type_id: i64,
        offset: &str,
        limit: usize,
    ) -> Result<ResalePage>;

    /// Request a payment form for an invoice; refusal means the invoice
    /// reference was not accepted.
    async fn payment_form(&self, invoice: &ResaleInvoice) -> Result<PaymentForm>;

    /// Submit the stars form bound to a previously issued form id.
    async fn submit_stars_form(
        &self,
        form_id: i64,
        invoice: &ResaleInvoice,
    ) -> Result<PaymentOutcome>;
}

#[derive(Serialize, Deserialize)]
struct SessionFile {
    token: String,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    api_id: i32,
    api_hash: &'a str,
    phone: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Serialize)]
struct SubmitFormRequest<'a> {
    form_id: i64,
    invoice: &'a ResaleInvoice,
}

#[derive(Deserialize)]
struct SubmitFormResponse {
    status: String,
    #[serde(default)]
    url: Option<String>,
}

/// Production [`RawGateway`]: JSON over HTTP against the configured gateway
/// endpoint, with the session token cached in memory and persisted on disk.
pub struct HttpGateway {
    http: reqwest::Client,
    base_url: String,
    api_id: i32,
    api_hash: String,
    session_path: PathBuf,
    token: RwLock<Option<String>>,
}

impl HttpGateway {
    /// Build a gateway bound to one session file. Creates the session
    /// directory (mode 0700) and loads a previously persisted token if one
    /// exists.
    pub fn new(base_url: &str, api_id: i32, api_hash: &str, session_path: PathBuf) -> Result<Self> {
        if let Some(dir) = session_path.parent() {
            create_session_dir(dir)?;
        }

        let token = match std::fs::read_to_string(&session_path) {
            Ok(raw) => serde_json::from_str::<SessionFile>(&raw)
                .ok()
                .map(|file| file.token),
            Err(_) => None,
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_id,
            api_hash: api_hash.to_string(),
            session_path,
            token: RwLock::new(token),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn bearer(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    async fn persist_token(&self, token: String) -> Result<()> {
        let raw = serde_json::to_vec(&SessionFile {
            token: token.clone(),
        })?;
        tokio::fs::write(&self.session_path, raw).await?;
        *self.token.write().await = Some(token);
        Ok(())
    }
}

#[async_trait]
impl RawGateway for HttpGateway {
    async fn connect(&self) -> Result<()> {
        self.http
            .get(self.url("/healthz"))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn is_authorized(&self) -> Result<bool> {
        let Some(token) = self.bearer().await else {
            return Ok(false);
        };
        let resp = self
            .http
            .get(self.url("/auth/me"))
            .bearer_auth(token)
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Ok(false);
        }
        resp.error_for_status()?;
        Ok(true)
    }

    async fn sign_in(&self, phone: &str, password: &str) -> Result<()> {
        let resp = self
            .http
            .post(self.url("/auth/login"))
            .json(&LoginRequest {
                api_id: self.api_id,
                api_hash: &self.api_hash,
                phone,
                password,
            })
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(BotError::Auth(format!("login rejected ({status}): {body}")));
        }
        let login: LoginResponse = resp.json().await?;
        self.persist_token(login.token).await
    }

    async fn catalog(&self, catalog_hash: i64) -> Result<CatalogPage> {
        let mut req = self
            .http
            .get(self.url("/gifts"))
            .query(&[("hash", catalog_hash.to_string())]);
        if let Some(token) = self.bearer().await {
            req = req.bearer_auth(token);
        }
        Ok(req.send().await?.error_for_status()?.json().await?)
    }

    async fn resale_listings(
        &self,
        gift_type_id: i64,
        offset: &str,
        limit: usize,
    ) -> Result<ResalePage> {
        let mut req = self.http.get(self.url("/resale")).query(&[
            ("gift_id", gift_type_id.to_string()),
            ("offset", offset.to_string()),
            ("limit", limit.to_string()),
            ("sort_by_price", "true".to_string()),
        ]);
        if let Some(token) = self.bearer().await {
            req = req.bearer_auth(token);
        }
        Ok(req.send().await?.error_for_status()?.json().await?)
    }

    async fn payment_form(&self, invoice: &ResaleInvoice) -> Result<PaymentForm> {
        let mut req = self.http.post(self.url("/payments/form")).json(invoice);
        if let Some(token) = self.bearer().await {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(BotError::Upstream(format!(
                "payment form refused ({status}): {body}"
            )));
        }
        Ok(resp.json().await?)
    }

    async fn submit_stars_form(
        &self,
        form_id: i64,
        invoice: &ResaleInvoice,
    ) -> Result<PaymentOutcome> {
        let mut req = self
            .http
            .post(self.url("/payments/submit"))
            .json(&SubmitFormRequest { form_id, invoice });
        if let Some(token) = self.bearer().await {
            req = req.bearer_auth(token);
        }
        let resp: SubmitFormResponse = req.send().await?.error_for_status()?.json().await?;
        Ok(match resp.status.as_str() {
            "success" => PaymentOutcome::Success,
            "verification_needed" => {
                PaymentOutcome::VerificationNeeded(resp.url.unwrap_or_default())
            }
            other => PaymentOutcome::Unknown(other.to_string()),
        })
    }
}

#[cfg(unix)]
fn create_session_dir(dir: &std::path::Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_session_dir(dir: &std::path::Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    Ok(())
}
