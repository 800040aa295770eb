//! Document store family on the `mongodb` driver
//!
//! Every handle is fixed to one database and one collection, taken from the
//! config's `database` and `sub_resource`.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::bson::Bson;
use mongodb::bson::Document;
use mongodb::options::ClientOptions;
use mongodb::options::Credential;
use mongodb::Client;
use mongodb::Collection;
use tracing::debug;

use super::BackendHandle;
use super::Connector;
use super::TaggedRegistry;
use crate::async_task::task_with_timeout_and_exponential_backoff;
use crate::config::require_mongo_target;
use crate::BackendError;
use crate::BackoffPolicy;
use crate::ConnectionConfig;
use crate::Result;
use crate::RoutingError;

pub type MongoRegistry = TaggedRegistry<MongoConnector>;

#[derive(Debug, Default, Clone, Copy)]
pub struct MongoConnector;

#[async_trait]
impl Connector for MongoConnector {
    type Handle = MongoHandle;

    /// Opens a client for `config.address`, authenticates with the config's
    /// credentials and pings the target database, retrying the ping
    /// `config.retry` times.
    async fn build(
        &self,
        config: &ConnectionConfig,
    ) -> Result<MongoHandle> {
        require_mongo_target(config)?;
        let connect_error = |e: mongodb::error::Error| BackendError::connect(&config.tag, &config.address, e);

        let mut options = ClientOptions::parse(&config.address).await.map_err(connect_error)?;
        options.connect_timeout = Some(config.timeout());
        options.server_selection_timeout = Some(config.timeout());
        if let Some(username) = &config.credentials.username {
            let mut credential = Credential::default();
            credential.username = Some(username.clone());
            credential.password = config.credentials.password.clone();
            credential.source = config.credentials.auth_source.clone();
            options.credential = Some(credential);
        }

        let client = Client::with_options(options).map_err(connect_error)?;
        let database = client.database(config.database.as_deref().unwrap_or_default());

        let ping = || {
            let database = database.clone();
            async move {
                database
                    .run_command(doc! { "ping": 1 })
                    .await
                    .map(|_| ())
                    .map_err(|e| crate::Error::from(connect_error(e)))
            }
        };
        task_with_timeout_and_exponential_backoff(ping, BackoffPolicy::for_connection(config.retry, config.timeout()))
            .await?;

        debug!(tag = %config.tag, "mongo connection verified");
        Ok(MongoHandle {
            collection: database.collection(config.sub_resource.as_deref().unwrap_or_default()),
            client,
            config: config.clone(),
            closed: AtomicBool::new(false),
        })
    }
}

/// Connection fixed to one database and collection
pub struct MongoHandle {
    client: Client,
    collection: Collection<Document>,
    config: ConnectionConfig,
    closed: AtomicBool,
}

impl MongoHandle {
    pub fn collection(&self) -> Result<&Collection<Document>> {
        if self.is_closed() {
            return Err(RoutingError::HandleClosed {
                tag: self.config.tag.clone(),
            }
            .into());
        }
        Ok(&self.collection)
    }

    /// Inserts one document, returning its `_id`
    pub async fn insert_doc(
        &self,
        document: Document,
    ) -> Result<Bson> {
        let result = self
            .collection()?
            .insert_one(document)
            .await
            .map_err(|e| BackendError::transport(&self.config.tag, e))?;
        Ok(result.inserted_id)
    }

    /// First document matching `filter`
    pub async fn find_doc(
        &self,
        filter: Document,
    ) -> Result<Option<Document>> {
        Ok(self
            .collection()?
            .find_one(filter)
            .await
            .map_err(|e| BackendError::transport(&self.config.tag, e))?)
    }

    /// Applies `update` (e.g. `doc! { "$set": { "age": 7 } }`) to the first
    /// match, returning the modified count
    pub async fn update_doc(
        &self,
        filter: Document,
        update: Document,
    ) -> Result<u64> {
        let result = self
            .collection()?
            .update_one(filter, update)
            .await
            .map_err(|e| BackendError::transport(&self.config.tag, e))?;
        Ok(result.modified_count)
    }

    /// Removes the first match, returning the deleted count
    pub async fn remove_doc(
        &self,
        filter: Document,
    ) -> Result<u64> {
        let result = self
            .collection()?
            .delete_one(filter)
            .await
            .map_err(|e| BackendError::transport(&self.config.tag, e))?;
        Ok(result.deleted_count)
    }
}

#[async_trait]
impl BackendHandle for MongoHandle {
    fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.client.clone().shutdown().await;
        debug!(tag = %self.config.tag, "mongo client shut down");
        Ok(())
    }
}
