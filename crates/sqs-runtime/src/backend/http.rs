//! Queue service backend speaking the SQS query API over HTTP.
//!
//! Requests are form-encoded POSTs signed with AWS Signature Version 4 and
//! responses are XML documents. Pointing [`QueueConfig::endpoint`] at a local
//! emulator works too; when no credentials are configured requests are sent
//! unsigned, which emulators accept.
//!
//! ## Example
//!
//! ```no_run
//! use sqs_runtime::backend::HttpSqsBackend;
//! use sqs_runtime::QueueConfig;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = QueueConfig {
//!     region: "us-east-1".to_string(),
//!     endpoint: Some("http://localhost:9324".to_string()),
//!     ..Default::default()
//! };
//!
//! let backend = HttpSqsBackend::new(&config)?;
//! # Ok(())
//! # }
//! ```

use super::{
    BatchEntryFailure, BatchEntrySuccess, BatchSendOutcome, RawMessage, ReceiveRequest,
    SendMessageEntry, SqsBackend, STRING_DATA_TYPE,
};
use crate::config::QueueConfig;
use crate::error::{ConfigurationError, QueueError, SerializationError};
use crate::message::{MessageId, QueueName, ReceiptHandle};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client as HttpClient;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;

const API_VERSION: &str = "2012-11-05";
const PROVIDER: &str = "sqs";

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised while talking to the queue service
#[derive(Debug, thiserror::Error)]
pub enum SqsHttpError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("SQS service error: {code}: {message}")]
    ServiceError { code: String, message: String },

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Invalid receipt handle: {0}")]
    InvalidReceipt(String),

    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl SqsHttpError {
    /// Map to the runtime's error type
    pub fn to_queue_error(self) -> QueueError {
        match self {
            Self::Authentication(msg) => QueueError::AuthenticationFailed { message: msg },
            Self::NetworkError(msg) => QueueError::ConnectionFailed { message: msg },
            Self::ServiceError { code, message } => QueueError::ProviderError {
                provider: PROVIDER.to_string(),
                code,
                message,
            },
            Self::QueueNotFound(queue) => QueueError::QueueNotFound { queue_name: queue },
            Self::InvalidReceipt(receipt) => QueueError::MessageNotFound { receipt },
            Self::ConfigurationError(msg) => {
                QueueError::ConfigurationError(ConfigurationError::Invalid { message: msg })
            }
            Self::MalformedResponse(msg) => {
                QueueError::SerializationError(SerializationError::MalformedResponse {
                    message: msg,
                })
            }
        }
    }
}

// ============================================================================
// AWS Signature V4 Signing
// ============================================================================

type HmacSha256 = Hmac<Sha256>;

/// AWS Signature Version 4 signer for request authentication
///
/// 1. Create canonical request (method, URI, query, headers, payload)
/// 2. Create string to sign (algorithm, timestamp, scope, request hash)
/// 3. Derive signing key (4-level HMAC chain)
/// 4. Calculate signature and build Authorization header
#[derive(Clone)]
struct AwsV4Signer {
    access_key: String,
    secret_key: String,
    region: String,
    service: String,
}

impl AwsV4Signer {
    fn new(access_key: String, secret_key: String, region: String) -> Self {
        Self {
            access_key,
            secret_key,
            region,
            service: "sqs".to_string(),
        }
    }

    /// Sign a POST request carrying a form-encoded body.
    ///
    /// Returns the `Authorization` and `x-amz-date` headers.
    fn sign_request(
        &self,
        method: &str,
        host: &str,
        path: &str,
        body: &str,
        timestamp: &DateTime<Utc>,
    ) -> Vec<(String, String)> {
        let date_stamp = timestamp.format("%Y%m%d").to_string();
        let amz_date = timestamp.format("%Y%m%dT%H%M%SZ").to_string();

        // Canonical headers (must be sorted)
        let canonical_headers = format!("host:{}\nx-amz-date:{}\n", host, amz_date);
        let signed_headers = "host;x-amz-date";

        let payload_hash = format!("{:x}", Sha256::digest(body.as_bytes()));

        // Parameters travel in the body, so the canonical query string is empty
        let canonical_request = format!(
            "{}\n{}\n\n{}\n{}\n{}",
            method, path, canonical_headers, signed_headers, payload_hash
        );

        let algorithm = "AWS4-HMAC-SHA256";
        let credential_scope = format!(
            "{}/{}/{}/aws4_request",
            date_stamp, self.region, self.service
        );
        let canonical_request_hash = format!("{:x}", Sha256::digest(canonical_request.as_bytes()));

        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            algorithm, amz_date, credential_scope, canonical_request_hash
        );

        let signature = self.calculate_signature(&string_to_sign, &date_stamp);

        let authorization_header = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            algorithm, self.access_key, credential_scope, signed_headers, signature
        );

        vec![
            ("Authorization".to_string(), authorization_header),
            ("x-amz-date".to_string(), amz_date),
        ]
    }

    /// Derive the signing key and sign
    ///
    /// kSecret = "AWS4" + secret, then HMAC over date, region, service and
    /// "aws4_request", then HMAC of the string to sign.
    fn calculate_signature(&self, string_to_sign: &str, date_stamp: &str) -> String {
        let k_secret = format!("AWS4{}", self.secret_key);
        let k_date = hmac_sha256(k_secret.as_bytes(), date_stamp.as_bytes());
        let k_region = hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = hmac_sha256(&k_region, self.service.as_bytes());
        let k_signing = hmac_sha256(&k_service, b"aws4_request");
        let signature = hmac_sha256(&k_signing, string_to_sign.as_bytes());

        hex::encode(signature)
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

// ============================================================================
// HTTP Backend
// ============================================================================

/// Queue service backend over the SQS query API
///
/// Cheap to share behind an `Arc`; the queue URL cache is protected by an
/// async `RwLock`.
pub struct HttpSqsBackend {
    http_client: HttpClient,
    signer: Option<AwsV4Signer>,
    endpoint: Url,
    queue_url_cache: Arc<RwLock<HashMap<String, String>>>,
}

impl HttpSqsBackend {
    /// Create a backend from connection settings
    ///
    /// Credentials come from the configuration, falling back to the
    /// `AWS_ACCESS_KEY_ID` and `AWS_SECRET_ACCESS_KEY` environment variables.
    pub fn new(config: &QueueConfig) -> Result<Self, QueueError> {
        config.validate()?;

        let access_key = config
            .access_key_id
            .clone()
            .or_else(|| std::env::var("AWS_ACCESS_KEY_ID").ok());
        let secret_key = config
            .secret_access_key
            .clone()
            .or_else(|| std::env::var("AWS_SECRET_ACCESS_KEY").ok());

        let signer = match (access_key, secret_key) {
            (Some(access_key), Some(secret_key)) => Some(AwsV4Signer::new(
                access_key,
                secret_key,
                config.region.clone(),
            )),
            _ => None,
        };

        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://sqs.{}.amazonaws.com", config.region));
        let endpoint = Url::parse(&endpoint).map_err(|e| {
            SqsHttpError::ConfigurationError(format!("Invalid endpoint '{}': {}", endpoint, e))
                .to_queue_error()
        })?;

        let http_client = HttpClient::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| {
                SqsHttpError::NetworkError(format!("Failed to create HTTP client: {}", e))
                    .to_queue_error()
            })?;

        Ok(Self {
            http_client,
            signer,
            endpoint,
            queue_url_cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Whether requests will be signed
    pub fn has_credentials(&self) -> bool {
        self.signer.is_some()
    }

    fn host(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// POST an action to the service and return the response body
    async fn make_request(&self, params: &[(String, String)]) -> Result<String, SqsHttpError> {
        let body = encode_form(params);
        let path = self.endpoint.path().to_string();

        let mut request = self
            .http_client
            .post(self.endpoint.clone())
            .header("content-type", "application/x-www-form-urlencoded")
            .body(body.clone());

        if let Some(signer) = &self.signer {
            let headers = signer.sign_request("POST", &self.host(), &path, &body, &Utc::now());
            for (key, value) in headers {
                request = request.header(&key, value);
            }
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SqsHttpError::NetworkError(format!("Request timeout: {}", e))
            } else if e.is_connect() {
                SqsHttpError::NetworkError(format!("Connection failed: {}", e))
            } else {
                SqsHttpError::NetworkError(format!("HTTP request failed: {}", e))
            }
        })?;

        let status = response.status();
        let response_body = response.text().await.map_err(|e| {
            SqsHttpError::NetworkError(format!("Failed to read response body: {}", e))
        })?;

        if !status.is_success() {
            return Err(parse_error_response(&response_body, status.as_u16()));
        }

        Ok(response_body)
    }
}

impl fmt::Debug for HttpSqsBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpSqsBackend")
            .field("endpoint", &self.endpoint.as_str())
            .field("signed", &self.signer.is_some())
            .finish()
    }
}

#[async_trait]
impl SqsBackend for HttpSqsBackend {
    async fn get_queue_url(
        &self,
        queue_name: &QueueName,
        account_id: Option<&str>,
    ) -> Result<String, QueueError> {
        let cache_key = format!("{}/{}", account_id.unwrap_or_default(), queue_name);
        {
            let cache = self.queue_url_cache.read().await;
            if let Some(url) = cache.get(&cache_key) {
                return Ok(url.clone());
            }
        }

        let mut params = action_params("GetQueueUrl");
        params.push(("QueueName".to_string(), queue_name.as_str().to_string()));
        if let Some(account_id) = account_id.filter(|id| !id.is_empty()) {
            params.push(("QueueOwnerAWSAccountId".to_string(), account_id.to_string()));
        }

        let response = self
            .make_request(&params)
            .await
            .map_err(|e| match e {
                SqsHttpError::QueueNotFound(_) => {
                    SqsHttpError::QueueNotFound(queue_name.to_string())
                }
                other => other,
            })
            .map_err(SqsHttpError::to_queue_error)?;
        let queue_url = parse_single_value(&response, b"QueueUrl")
            .map_err(SqsHttpError::to_queue_error)?;

        debug!(queue = %queue_name, queue_url = %queue_url, "Resolved queue URL");

        let mut cache = self.queue_url_cache.write().await;
        cache.insert(cache_key, queue_url.clone());

        Ok(queue_url)
    }

    async fn receive_messages(
        &self,
        request: &ReceiveRequest,
    ) -> Result<Vec<RawMessage>, QueueError> {
        let mut params = action_params("ReceiveMessage");
        params.push(("QueueUrl".to_string(), request.queue_url.clone()));
        params.push((
            "MaxNumberOfMessages".to_string(),
            request.max_messages.clamp(1, super::MAX_RECEIVE_MESSAGES).to_string(),
        ));
        params.push((
            "WaitTimeSeconds".to_string(),
            request.wait_time_seconds.min(20).to_string(),
        ));
        for (idx, name) in request.attribute_names.iter().enumerate() {
            params.push((format!("AttributeName.{}", idx + 1), name.clone()));
        }
        for (idx, name) in request.message_attribute_names.iter().enumerate() {
            params.push((format!("MessageAttributeName.{}", idx + 1), name.clone()));
        }
        if let Some(visibility_timeout) = request.visibility_timeout {
            params.push((
                "VisibilityTimeout".to_string(),
                visibility_timeout.to_string(),
            ));
        }

        let response = self
            .make_request(&params)
            .await
            .map_err(SqsHttpError::to_queue_error)?;

        parse_receive_message_response(&response).map_err(SqsHttpError::to_queue_error)
    }

    async fn send_message(
        &self,
        queue_url: &str,
        entry: &SendMessageEntry,
    ) -> Result<MessageId, QueueError> {
        let mut params = action_params("SendMessage");
        params.push(("QueueUrl".to_string(), queue_url.to_string()));
        push_entry_params("", entry, &mut params);

        let response = self
            .make_request(&params)
            .await
            .map_err(SqsHttpError::to_queue_error)?;

        let message_id = parse_single_value(&response, b"MessageId")
            .map_err(SqsHttpError::to_queue_error)?;
        Ok(message_id.parse().unwrap_or_default())
    }

    async fn send_message_batch(
        &self,
        queue_url: &str,
        entries: &[SendMessageEntry],
    ) -> Result<BatchSendOutcome, QueueError> {
        if entries.is_empty() {
            return Ok(BatchSendOutcome::default());
        }

        if entries.len() > super::MAX_BATCH_ENTRIES {
            return Err(QueueError::BatchTooLarge {
                size: entries.len(),
                max_size: super::MAX_BATCH_ENTRIES,
            });
        }

        let mut params = action_params("SendMessageBatch");
        params.push(("QueueUrl".to_string(), queue_url.to_string()));
        for (idx, entry) in entries.iter().enumerate() {
            let prefix = format!("SendMessageBatchRequestEntry.{}.", idx + 1);
            params.push((format!("{}Id", prefix), entry.id.clone()));
            push_entry_params(&prefix, entry, &mut params);
        }

        let response = self
            .make_request(&params)
            .await
            .map_err(SqsHttpError::to_queue_error)?;

        parse_send_message_batch_response(&response).map_err(SqsHttpError::to_queue_error)
    }

    async fn delete_message(
        &self,
        queue_url: &str,
        receipt: &ReceiptHandle,
    ) -> Result<(), QueueError> {
        let mut params = action_params("DeleteMessage");
        params.push(("QueueUrl".to_string(), queue_url.to_string()));
        params.push(("ReceiptHandle".to_string(), receipt.handle().to_string()));

        // DeleteMessage returns an empty result on success
        self.make_request(&params)
            .await
            .map_err(SqsHttpError::to_queue_error)?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        PROVIDER
    }
}

// ============================================================================
// Request Encoding
// ============================================================================

fn action_params(action: &str) -> Vec<(String, String)> {
    vec![
        ("Action".to_string(), action.to_string()),
        ("Version".to_string(), API_VERSION.to_string()),
    ]
}

/// Append the parameters describing one message, each key prefixed
fn push_entry_params(prefix: &str, entry: &SendMessageEntry, params: &mut Vec<(String, String)>) {
    params.push((format!("{}MessageBody", prefix), entry.body.clone()));

    if let Some(delay) = entry.delay_seconds {
        params.push((format!("{}DelaySeconds", prefix), delay.to_string()));
    }
    if let Some(group_id) = &entry.group_id {
        params.push((format!("{}MessageGroupId", prefix), group_id.clone()));
    }
    if let Some(dedup_id) = &entry.deduplication_id {
        params.push((format!("{}MessageDeduplicationId", prefix), dedup_id.clone()));
    }

    for (idx, (name, value)) in entry.message_attributes.iter().enumerate() {
        let attr = format!("{}MessageAttribute.{}", prefix, idx + 1);
        params.push((format!("{}.Name", attr), name.clone()));
        params.push((format!("{}.Value.StringValue", attr), value.clone()));
        params.push((
            format!("{}.Value.DataType", attr),
            STRING_DATA_TYPE.to_string(),
        ));
    }
}

fn encode_form(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

// ============================================================================
// Response Parsing
// ============================================================================

fn xml_error(e: impl fmt::Display) -> SqsHttpError {
    SqsHttpError::MalformedResponse(format!("XML parsing error: {}", e))
}

/// Text of the first element with the given name
fn parse_single_value(xml: &str, element: &[u8]) -> Result<String, SqsHttpError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut inside = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == element => inside = true,
            Ok(Event::Text(e)) if inside => {
                return e.unescape().map(|s| s.into_owned()).map_err(xml_error);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
        buf.clear();
    }

    Err(SqsHttpError::MalformedResponse(format!(
        "{} not found in response",
        String::from_utf8_lossy(element)
    )))
}

/// Map an error document to an error
fn parse_error_response(xml: &str, status_code: u16) -> SqsHttpError {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut error_code = None;
    let mut error_message = None;
    let mut in_error = false;
    let mut in_code = false;
    let mut in_message = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Error" => in_error = true,
                b"Code" if in_error => in_code = true,
                b"Message" if in_error => in_message = true,
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_code {
                    error_code = e.unescape().ok().map(|s| s.into_owned());
                    in_code = false;
                } else if in_message {
                    error_message = e.unescape().ok().map(|s| s.into_owned());
                    in_message = false;
                }
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Error" => {
                in_error = false;
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    let code = error_code.unwrap_or_else(|| "Unknown".to_string());
    let message = error_message.unwrap_or_else(|| format!("HTTP status {}", status_code));

    match code.as_str() {
        "AWS.SimpleQueueService.NonExistentQueue" | "QueueDoesNotExist" => {
            SqsHttpError::QueueNotFound(message)
        }
        "InvalidClientTokenId" | "UnrecognizedClientException" | "SignatureDoesNotMatch" => {
            SqsHttpError::Authentication(format!("{}: {}", code, message))
        }
        "InvalidReceiptHandle" | "ReceiptHandleIsInvalid" => SqsHttpError::InvalidReceipt(message),
        _ if status_code == 401 || status_code == 403 => {
            SqsHttpError::Authentication(format!("{}: {}", code, message))
        }
        _ => SqsHttpError::ServiceError { code, message },
    }
}

fn element_name(name: &[u8]) -> String {
    String::from_utf8_lossy(name).into_owned()
}

/// Parse a ReceiveMessage result.
///
/// Bodies keep their exact whitespace, so text is not trimmed; only leaf
/// elements under a known parent are read.
fn parse_receive_message_response(xml: &str) -> Result<Vec<RawMessage>, SqsHttpError> {
    let mut reader = Reader::from_str(xml);

    let mut messages = Vec::new();
    let mut path: Vec<String> = Vec::new();
    let mut current: Option<RawMessage> = None;
    let mut attribute_name: Option<String> = None;
    let mut attribute_value: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = element_name(e.name().as_ref());
                match name.as_str() {
                    "Message" => current = Some(RawMessage::default()),
                    "Body" => {
                        if let Some(message) = current.as_mut() {
                            message.body = Some(String::new());
                        }
                    }
                    "Attribute" | "MessageAttribute" => {
                        attribute_name = None;
                        attribute_value = None;
                    }
                    _ => {}
                }
                path.push(name);
            }
            Ok(Event::Empty(ref e)) => {
                if e.name().as_ref() == b"Body" {
                    if let Some(message) = current.as_mut() {
                        message.body = Some(String::new());
                    }
                }
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().map_err(xml_error)?.into_owned();
                let leaf = path.last().map(String::as_str);
                let parent = path.iter().rev().nth(1).map(String::as_str);

                match (leaf, parent) {
                    (Some("MessageId"), Some("Message")) => {
                        if let Some(message) = current.as_mut() {
                            message.message_id = text;
                        }
                    }
                    (Some("ReceiptHandle"), Some("Message")) => {
                        if let Some(message) = current.as_mut() {
                            message.receipt_handle = text;
                        }
                    }
                    (Some("Body"), Some("Message")) => {
                        if let Some(body) = current.as_mut().and_then(|m| m.body.as_mut()) {
                            body.push_str(&text);
                        }
                    }
                    (Some("Name"), Some("Attribute" | "MessageAttribute")) => {
                        attribute_name = Some(text.trim().to_string());
                    }
                    (Some("Value"), Some("Attribute")) | (Some("StringValue"), Some("Value")) => {
                        attribute_value = Some(text);
                    }
                    _ => {}
                }
            }
            Ok(Event::CData(e)) => {
                if path.last().map(String::as_str) == Some("Body") {
                    if let Some(body) = current.as_mut().and_then(|m| m.body.as_mut()) {
                        body.push_str(&String::from_utf8_lossy(&e));
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                path.pop();
                match e.name().as_ref() {
                    b"Attribute" => {
                        if let (Some(message), Some(name), Some(value)) =
                            (current.as_mut(), attribute_name.take(), attribute_value.take())
                        {
                            message.attributes.insert(name, value);
                        }
                    }
                    b"MessageAttribute" => {
                        if let (Some(message), Some(name), Some(value)) =
                            (current.as_mut(), attribute_name.take(), attribute_value.take())
                        {
                            message.message_attributes.insert(name, value);
                        }
                    }
                    b"Message" => {
                        if let Some(message) = current.take() {
                            messages.push(message);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(messages)
}

/// Parse a SendMessageBatch result into per-entry outcomes
fn parse_send_message_batch_response(xml: &str) -> Result<BatchSendOutcome, SqsHttpError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut outcome = BatchSendOutcome::default();
    let mut path: Vec<String> = Vec::new();
    let mut fields: HashMap<String, String> = HashMap::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = element_name(e.name().as_ref());
                if name == "SendMessageBatchResultEntry" || name == "BatchResultErrorEntry" {
                    fields.clear();
                }
                path.push(name);
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().map_err(xml_error)?.into_owned();
                let parent = path.iter().rev().nth(1).map(String::as_str);
                if matches!(
                    parent,
                    Some("SendMessageBatchResultEntry" | "BatchResultErrorEntry")
                ) {
                    if let Some(leaf) = path.last() {
                        fields.insert(leaf.clone(), text);
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                path.pop();
                match e.name().as_ref() {
                    b"SendMessageBatchResultEntry" => {
                        outcome.successful.push(BatchEntrySuccess {
                            id: fields.remove("Id").unwrap_or_default(),
                            message_id: fields
                                .remove("MessageId")
                                .and_then(|id| id.parse().ok())
                                .unwrap_or_default(),
                        });
                    }
                    b"BatchResultErrorEntry" => {
                        outcome.failed.push(BatchEntryFailure {
                            id: fields.remove("Id").unwrap_or_default(),
                            code: fields.remove("Code").unwrap_or_default(),
                            message: fields.remove("Message").unwrap_or_default(),
                            sender_fault: fields
                                .remove("SenderFault")
                                .map(|v| v.eq_ignore_ascii_case("true"))
                                .unwrap_or(false),
                        });
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(outcome)
}
