//! Authenticated REST transport to the STAC catalog server.
//!
//! The client owns its bearer token and refreshes it transparently when a
//! request comes back 401; nothing about authentication is global state.

use std::sync::RwLock;

use reqwest::{Client, Method, Response, StatusCode};
use serde_json::Value;
use stac::ItemCollection;
use tracing::info;
use url::Url;

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::records::{CollectionRecord, ItemRecord};

/// Three-way existence answer: transport failures are errors, a 404 is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Exists,
    NotFound,
}

pub trait CatalogOps {
    async fn collection_state(self: &Self, collection_id: &str) -> Result<Resource>;

    async fn collection_items(self: &Self, collection_id: &str) -> Result<ItemCollection>;

    async fn put_collection(self: &Self, record: &CollectionRecord) -> Result<()>;

    async fn put_item(self: &Self, collection_id: &str, record: &ItemRecord) -> Result<()>;

    /// Returns whether the collection was actually there to delete.
    async fn delete_collection(self: &Self, collection_id: &str) -> Result<bool>;
}

pub struct CatalogClient {
    http: Client,
    base: Url,
    auth_path: String,
    username: String,
    password: String,
    token: RwLock<String>,
}

impl CatalogClient {
    /// Build a client and authenticate immediately, so credential problems
    /// surface before any pipeline work starts.
    pub async fn connect(settings: &Settings, username: &str, password: &str) -> Result<Self> {
        let client = CatalogClient {
            http: Client::new(),
            base: Url::parse(&settings.stac_url)?,
            auth_path: settings.auth_path.clone(),
            username: username.to_string(),
            password: password.to_string(),
            token: RwLock::new(String::new()),
        };
        client.authenticate().await?;
        Ok(client)
    }

    async fn authenticate(self: &Self) -> Result<()> {
        let url = self.base.join(&self.auth_path)?;
        let response = self
            .http
            .post(url.clone())
            .form(&[
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Auth(format!(
                "{url} returned status {}",
                response.status()
            )));
        }

        let body: Value = response.json().await?;
        let token = body
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Auth("no access_token in response".to_string()))?;

        *self.token.write().expect("token lock is never poisoned") = token.to_string();
        info!("Token updated successfully");
        Ok(())
    }

    fn bearer(self: &Self) -> String {
        self.token.read().expect("token lock is never poisoned").clone()
    }

    async fn request(&self, method: Method, url: Url, body: Option<&Value>) -> Result<Response> {
        let mut builder = self.http.request(method, url).bearer_auth(self.bearer());
        if let Some(body) = body {
            builder = builder.json(body);
        }
        Ok(builder.send().await?)
    }

    /// Send with the current token; on 401, re-authenticate once and retry.
    async fn send(&self, method: Method, url: Url, body: Option<&Value>) -> Result<Response> {
        let response = self.request(method.clone(), url.clone(), body).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        info!("Token rejected, re-authenticating");
        self.authenticate().await?;
        self.request(method, url, body).await
    }

    /// Create-or-update: POST first, retry as PUT on a 409 conflict. An
    /// unchanged resource may answer the PUT with 404; tolerated.
    async fn post_or_put(&self, url: Url, body: &Value) -> Result<()> {
        let response = self.send(Method::POST, url.clone(), Some(body)).await?;
        if response.status() != StatusCode::CONFLICT {
            return check_status(&response);
        }

        let response = self.send(Method::PUT, url, Some(body)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_status(&response)
    }

    fn collections_url(&self) -> Result<Url> {
        Ok(self.base.join("/collections")?)
    }

    fn collection_url(&self, collection_id: &str) -> Result<Url> {
        Ok(self.base.join(&format!("/collections/{collection_id}"))?)
    }

    fn items_url(&self, collection_id: &str) -> Result<Url> {
        Ok(self
            .base
            .join(&format!("/collections/{collection_id}/items"))?)
    }
}

fn check_status(response: &Response) -> Result<()> {
    if response.status().is_success() {
        return Ok(());
    }
    Err(Error::CatalogStatus {
        url: response.url().to_string(),
        status: response.status().as_u16(),
    })
}

impl CatalogOps for CatalogClient {
    async fn collection_state(self: &Self, collection_id: &str) -> Result<Resource> {
        let url = self.collection_url(collection_id)?;
        let response = self.send(Method::GET, url, None).await?;
        match response.status() {
            status if status.is_success() => Ok(Resource::Exists),
            StatusCode::NOT_FOUND => Ok(Resource::NotFound),
            status => Err(Error::CatalogStatus {
                url: response.url().to_string(),
                status: status.as_u16(),
            }),
        }
    }

    async fn collection_items(self: &Self, collection_id: &str) -> Result<ItemCollection> {
        let url = self.items_url(collection_id)?;
        let response = self.send(Method::GET, url, None).await?;
        check_status(&response)?;
        Ok(response.json::<ItemCollection>().await?)
    }

    async fn put_collection(self: &Self, record: &CollectionRecord) -> Result<()> {
        let body = serde_json::to_value(record)?;
        self.post_or_put(self.collections_url()?, &body).await
    }

    async fn put_item(self: &Self, collection_id: &str, record: &ItemRecord) -> Result<()> {
        let body = serde_json::to_value(record)?;
        self.post_or_put(self.items_url(collection_id)?, &body).await
    }

    async fn delete_collection(self: &Self, collection_id: &str) -> Result<bool> {
        let url = self.collection_url(collection_id)?;
        let response = self.send(Method::DELETE, url, None).await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(Error::CatalogStatus {
                url: response.url().to_string(),
                status: status.as_u16(),
            }),
        }
    }
}
