//! Typed CRUD operations used by resource wrappers.
//!
//! Records go out and come back as JSON through serde. Every operation runs
//! through [`ApiClient::execute`], so caching, retries and session handling
//! apply uniformly.

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::client::ApiClient;
use super::error::{truncate_body, ApiError};
use super::request::{ApiRequest, ApiResponse, CONTENT_TYPE_JSON, CONTENT_TYPE_MERGE_PATCH};

/// What a create call produced.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateResponse<T> {
    /// The created record as the server returned it.
    Record(T),
    /// Identifiers of created records, for endpoints that answer with a list.
    Ids(Vec<String>),
    /// Success without a body.
    NoContent,
}

impl<T> CreateResponse<T> {
    pub fn into_record(self) -> Option<T> {
        match self {
            CreateResponse::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn ids(&self) -> Option<&[String]> {
        match self {
            CreateResponse::Ids(ids) => Some(ids),
            _ => None,
        }
    }
}

impl ApiClient {
    /// POST a record to `endpoint`.
    pub async fn create<T>(&self, endpoint: &str, value: &T) -> Result<CreateResponse<T>, ApiError>
    where
        T: Serialize + DeserializeOwned,
    {
        let body = encode_record(value)?;
        let response = self
            .execute(ApiRequest::new(Method::POST, endpoint).with_body(body, CONTENT_TYPE_JSON))
            .await?;

        if !response.has_content() {
            return Ok(CreateResponse::NoContent);
        }
        if let Ok(ids) = serde_json::from_str::<Vec<String>>(&response.body) {
            debug!(endpoint, count = ids.len(), "Create returned identifiers");
            return Ok(CreateResponse::Ids(ids));
        }
        decode(endpoint, &response.body).map(CreateResponse::Record)
    }

    /// GET `endpoint` and decode the body.
    pub async fn read<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, ApiError> {
        let response = self.execute(ApiRequest::get(endpoint)).await?;
        decode(endpoint, &response.body)
    }

    /// Replace a record with PUT. Returns the updated record when the server
    /// sends one back.
    pub async fn update_with_put<T>(&self, endpoint: &str, value: &T) -> Result<Option<T>, ApiError>
    where
        T: Serialize + DeserializeOwned,
    {
        let body = encode_record(value)?;
        let response = self
            .execute(ApiRequest::new(Method::PUT, endpoint).with_body(body, CONTENT_TYPE_JSON))
            .await?;
        decode_optional(endpoint, &response)
    }

    /// Partially update a record with a JSON merge-patch.
    pub async fn update<T>(&self, endpoint: &str, value: &T) -> Result<Option<T>, ApiError>
    where
        T: Serialize + DeserializeOwned,
    {
        let body = encode_record(value)?;
        let response = self
            .execute(
                ApiRequest::new(Method::PATCH, endpoint).with_body(body, CONTENT_TYPE_MERGE_PATCH),
            )
            .await?;
        decode_optional(endpoint, &response)
    }

    pub async fn delete(&self, endpoint: &str) -> Result<(), ApiError> {
        self.execute(ApiRequest::new(Method::DELETE, endpoint)).await?;
        Ok(())
    }

    /// Delete many records in one POST. Success is a 2xx without a body; a
    /// body means the server did something other than a plain delete.
    pub async fn bulk_delete<P: Serialize>(&self, endpoint: &str, payload: &P) -> Result<(), ApiError> {
        let body = serde_json::to_string(payload).map_err(ApiError::Encode)?;
        let response = self
            .execute(ApiRequest::new(Method::POST, endpoint).with_body(body, CONTENT_TYPE_JSON))
            .await?;
        if response.has_content() {
            return Err(ApiError::UnexpectedContent {
                status: response.status.as_u16(),
                body: truncate_body(&response.body),
            });
        }
        Ok(())
    }

    /// POST a JSON array payload.
    pub async fn create_with_slice_payload<P, T>(
        &self,
        endpoint: &str,
        payload: &P,
    ) -> Result<Option<T>, ApiError>
    where
        P: Serialize,
        T: DeserializeOwned,
    {
        let body = encode_sequence(payload)?;
        let response = self
            .execute(ApiRequest::new(Method::POST, endpoint).with_body(body, CONTENT_TYPE_JSON))
            .await?;
        decode_optional(endpoint, &response)
    }

    /// PUT a JSON array payload.
    pub async fn update_with_slice_payload<P, T>(
        &self,
        endpoint: &str,
        payload: &P,
    ) -> Result<Option<T>, ApiError>
    where
        P: Serialize,
        T: DeserializeOwned,
    {
        let body = encode_sequence(payload)?;
        let response = self
            .execute(ApiRequest::new(Method::PUT, endpoint).with_body(body, CONTENT_TYPE_JSON))
            .await?;
        decode_optional(endpoint, &response)
    }

    /// POST an already serialized JSON document as-is.
    pub async fn create_with_raw_payload<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        payload: &str,
    ) -> Result<Option<T>, ApiError> {
        if payload.trim().is_empty() {
            return Err(ApiError::InvalidArgument("raw payload is empty".to_string()));
        }
        let response = self
            .execute(
                ApiRequest::new(Method::POST, endpoint)
                    .with_body(payload.to_string(), CONTENT_TYPE_JSON),
            )
            .await?;
        decode_optional(endpoint, &response)
    }
}

/// Serialize a value that must be a single JSON object.
fn encode_record<T: Serialize>(value: &T) -> Result<String, ApiError> {
    let value = serde_json::to_value(value).map_err(ApiError::Encode)?;
    if !value.is_object() {
        return Err(ApiError::InvalidArgument(format!(
            "expected a record, got {}",
            json_kind(&value)
        )));
    }
    serde_json::to_string(&value).map_err(ApiError::Encode)
}

/// Serialize a value that must be a JSON array.
fn encode_sequence<P: Serialize>(payload: &P) -> Result<String, ApiError> {
    let value = serde_json::to_value(payload).map_err(ApiError::Encode)?;
    if !value.is_array() {
        return Err(ApiError::InvalidArgument(format!(
            "expected a sequence, got {}",
            json_kind(&value)
        )));
    }
    serde_json::to_string(&value).map_err(ApiError::Encode)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a record",
    }
}

fn decode<T: DeserializeOwned>(endpoint: &str, body: &str) -> Result<T, ApiError> {
    serde_json::from_str(body).map_err(|source| ApiError::Decode {
        endpoint: endpoint.to_string(),
        source,
    })
}

fn decode_optional<T: DeserializeOwned>(
    endpoint: &str,
    response: &ApiResponse,
) -> Result<Option<T>, ApiError> {
    if !response.has_content() {
        return Ok(None);
    }
    decode(endpoint, &response.body).map(Some)
}
