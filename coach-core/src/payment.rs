use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, Offset, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use subtle::ConstantTimeEq;

type HmacSha512 = Hmac<Sha512>;

pub const SECURE_HASH: &str = "vnp_SecureHash";
pub const SECURE_HASH_TYPE: &str = "vnp_SecureHashType";
pub const RESPONSE_SUCCESS: &str = "00";

fn default_version() -> String {
    "2.1.0".to_string()
}

fn default_locale() -> String {
    "vn".to_string()
}

fn default_currency() -> String {
    "VND".to_string()
}

fn default_utc_offset_hours() -> i32 {
    7
}

/// Merchant credentials and endpoints for the VNPay gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    pub tmn_code: String,
    pub secret_key: String,
    pub gateway_url: String,
    pub return_url: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Timestamps sent to the gateway are rendered in this offset.
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest<'a> {
    pub booking_code: &'a str,
    /// Payable amount in VND; the gateway receives it in minor units (x100).
    pub amount: i64,
    pub client_ip: &'a str,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentUrl {
    pub payment_url: String,
    pub order_id: String,
    pub amount: i64,
}

/// Verified content of a gateway callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackParams {
    pub reference: String,
    pub response_code: String,
    /// Settled amount in VND.
    pub amount: i64,
    pub transaction_no: Option<String>,
}

impl CallbackParams {
    pub fn is_success(&self) -> bool {
        self.response_code == RESPONSE_SUCCESS
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("secure hash does not match")]
    SignatureMismatch,
    #[error("callback is missing {0}")]
    MissingField(&'static str),
    #[error("callback amount is malformed: {0}")]
    MalformedAmount(String),
    #[error("signing key rejected")]
    InvalidKey,
}

/// Payment gateway seam: builds checkout redirects and authenticates callbacks.
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &'static str;

    fn checkout_url(&self, request: &CheckoutRequest<'_>) -> Result<PaymentUrl, GatewayError>;

    fn verify_callback(
        &self,
        params: &BTreeMap<String, String>,
    ) -> Result<CallbackParams, GatewayError>;
}

pub struct VnPayGateway {
    config: PaymentConfig,
}

impl VnPayGateway {
    pub fn new(config: PaymentConfig) -> Self {
        Self { config }
    }

    fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.config.utc_offset_hours * 3600).unwrap_or_else(|| Utc.fix())
    }

    fn gateway_time(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.offset())
            .format("%Y%m%d%H%M%S")
            .to_string()
    }
}

impl PaymentGateway for VnPayGateway {
    fn name(&self) -> &'static str {
        "vnpay"
    }

    fn checkout_url(&self, request: &CheckoutRequest<'_>) -> Result<PaymentUrl, GatewayError> {
        let mut params = BTreeMap::new();
        params.insert("vnp_Version".to_string(), self.config.version.clone());
        params.insert("vnp_Command".to_string(), "pay".to_string());
        params.insert("vnp_TmnCode".to_string(), self.config.tmn_code.clone());
        params.insert("vnp_Locale".to_string(), self.config.locale.clone());
        params.insert("vnp_CurrCode".to_string(), self.config.currency.clone());
        params.insert("vnp_TxnRef".to_string(), request.booking_code.to_string());
        params.insert(
            "vnp_OrderInfo".to_string(),
            format!("Thanh toan ve xe cho booking {}", request.booking_code),
        );
        params.insert("vnp_OrderType".to_string(), "billpayment".to_string());
        params.insert("vnp_Amount".to_string(), (request.amount * 100).to_string());
        params.insert("vnp_ReturnUrl".to_string(), self.config.return_url.clone());
        params.insert("vnp_IpAddr".to_string(), request.client_ip.to_string());
        params.insert("vnp_CreateDate".to_string(), self.gateway_time(request.created_at));
        params.insert("vnp_ExpireDate".to_string(), self.gateway_time(request.expires_at));

        let query = canonical_query(&params);
        let signature = sign(&query, &self.config.secret_key)?;

        Ok(PaymentUrl {
            payment_url: format!(
                "{}?{}&{}={}",
                self.config.gateway_url, query, SECURE_HASH, signature
            ),
            order_id: request.booking_code.to_string(),
            amount: request.amount,
        })
    }

    fn verify_callback(
        &self,
        params: &BTreeMap<String, String>,
    ) -> Result<CallbackParams, GatewayError> {
        let provided = params
            .get(SECURE_HASH)
            .ok_or(GatewayError::MissingField(SECURE_HASH))?;
        if !verify(params, provided, &self.config.secret_key)? {
            return Err(GatewayError::SignatureMismatch);
        }

        let field = |name: &'static str| {
            params
                .get(name)
                .cloned()
                .ok_or(GatewayError::MissingField(name))
        };
        let raw_amount = field("vnp_Amount")?;
        let minor: i64 = raw_amount
            .parse()
            .map_err(|_| GatewayError::MalformedAmount(raw_amount.clone()))?;
        // VND has no minor unit; the gateway always sends whole dong times 100
        if minor < 0 || minor % 100 != 0 {
            return Err(GatewayError::MalformedAmount(raw_amount));
        }

        Ok(CallbackParams {
            reference: field("vnp_TxnRef")?,
            response_code: field("vnp_ResponseCode")?,
            amount: minor / 100,
            transaction_no: params.get("vnp_TransactionNo").cloned(),
        })
    }
}

/// Form-style component encoding: percent-encoded with spaces as `+`.
pub fn encode_component(value: &str) -> String {
    urlencoding::encode(value).replace("%20", "+")
}

/// `k=v&k=v` over the encoded pairs in key order, skipping the hash fields.
pub fn canonical_query(params: &BTreeMap<String, String>) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .filter(|(k, _)| k.as_str() != SECURE_HASH && k.as_str() != SECURE_HASH_TYPE)
        .map(|(k, v)| (encode_component(k), encode_component(v)))
        .collect();
    encoded.sort_by(|a, b| a.0.cmp(&b.0));
    encoded
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Lowercase hex HMAC-SHA512 of `data`.
pub fn sign(data: &str, secret: &str) -> Result<String, GatewayError> {
    let mut mac =
        HmacSha512::new_from_slice(secret.as_bytes()).map_err(|_| GatewayError::InvalidKey)?;
    mac.update(data.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Recomputes the signature over `params` and compares it in constant time.
pub fn verify(
    params: &BTreeMap<String, String>,
    provided: &str,
    secret: &str,
) -> Result<bool, GatewayError> {
    let expected = sign(&canonical_query(params), secret)?;
    let provided = provided.to_ascii_lowercase();
    Ok(expected.as_bytes().ct_eq(provided.as_bytes()).into())
}
