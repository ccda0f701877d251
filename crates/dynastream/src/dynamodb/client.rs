//! Gateways over the AWS SDK.

use super::convert;
use crate::common::{
    Cursor, Item, RecordBatch, Result, ShardIteratorType, ShardPage, StreamError, StreamGateway,
    StreamRef, StreamViewType, TableDescription, TableGateway, TableRef,
};
use crate::config::DynastreamConfig;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::client::Waiters;
use aws_sdk_dynamodb::config::{Credentials, Region};
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, KeySchemaElement, KeyType, ProvisionedThroughput, ReturnValue,
    ScalarAttributeType, StreamSpecification,
};
use aws_sdk_dynamodbstreams::types::ShardIteratorType as SdkShardIteratorType;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const CREDENTIALS_PROVIDER: &str = "dynastream";

/// How long `wait_until_exists` waits for a table to become active.
pub const DEFAULT_TABLE_WAIT: Duration = Duration::from_secs(120);

/// Load shared SDK configuration: static credentials, region and optional
/// endpoint override.
pub async fn sdk_config(config: &DynastreamConfig) -> aws_config::SdkConfig {
    let credentials = Credentials::new(
        config.access_key.clone(),
        config.secret_key.expose_secret().to_string(),
        None,
        None,
        CREDENTIALS_PROVIDER,
    );

    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.region.clone()))
        .credentials_provider(credentials);

    if let Some(endpoint) = &config.endpoint_url {
        loader = loader.endpoint_url(endpoint);
    }

    loader.load().await
}

/// Both gateways, sharing one SDK configuration.
#[derive(Clone)]
pub struct DynamoDbClients {
    pub tables: Arc<DynamoDbTableGateway>,
    pub streams: Arc<DynamoDbStreamGateway>,
}

impl DynamoDbClients {
    pub async fn connect(config: &DynastreamConfig) -> Self {
        let sdk = sdk_config(config).await;
        info!(
            region = %config.region,
            endpoint = config.endpoint_url.as_deref().unwrap_or("default"),
            "Configured DynamoDB clients"
        );

        Self {
            tables: Arc::new(
                DynamoDbTableGateway::new(aws_sdk_dynamodb::Client::new(&sdk)).with_throughput(
                    config.table.read_capacity_units,
                    config.table.write_capacity_units,
                ),
            ),
            streams: Arc::new(DynamoDbStreamGateway::new(
                aws_sdk_dynamodbstreams::Client::new(&sdk),
            )),
        }
    }
}

// ============================================================================
// Table gateway
// ============================================================================

/// [`TableGateway`] over `aws-sdk-dynamodb`.
#[derive(Clone)]
pub struct DynamoDbTableGateway {
    client: aws_sdk_dynamodb::Client,
    read_capacity_units: i64,
    write_capacity_units: i64,
    wait_timeout: Duration,
}

impl std::fmt::Debug for DynamoDbTableGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamoDbTableGateway")
            .field("read_capacity_units", &self.read_capacity_units)
            .field("write_capacity_units", &self.write_capacity_units)
            .finish()
    }
}

impl DynamoDbTableGateway {
    pub fn new(client: aws_sdk_dynamodb::Client) -> Self {
        Self {
            client,
            read_capacity_units: 5,
            write_capacity_units: 5,
            wait_timeout: DEFAULT_TABLE_WAIT,
        }
    }

    /// Provisioned throughput of created tables.
    pub fn with_throughput(mut self, read: i64, write: i64) -> Self {
        self.read_capacity_units = read;
        self.write_capacity_units = write;
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }
}

fn table_error(table: &str, err: impl std::error::Error) -> StreamError {
    StreamError::table_unavailable(table, DisplayErrorContext(err).to_string())
}

#[async_trait]
impl TableGateway for DynamoDbTableGateway {
    async fn describe_table(&self, table: &TableRef) -> Result<TableDescription> {
        let out = self
            .client
            .describe_table()
            .table_name(table.as_str())
            .send()
            .await
            .map_err(|e| table_error(table.as_str(), e))?;

        out.table()
            .map(convert::table_description)
            .ok_or_else(|| StreamError::table_unavailable(table.as_str(), "empty table description"))
    }

    async fn create_table(
        &self,
        name: &str,
        key_name: &str,
        view_type: StreamViewType,
    ) -> Result<TableDescription> {
        let attribute = AttributeDefinition::builder()
            .attribute_name(key_name)
            .attribute_type(ScalarAttributeType::S)
            .build()
            .map_err(|e| table_error(name, e))?;
        let key = KeySchemaElement::builder()
            .attribute_name(key_name)
            .key_type(KeyType::Hash)
            .build()
            .map_err(|e| table_error(name, e))?;
        let throughput = ProvisionedThroughput::builder()
            .read_capacity_units(self.read_capacity_units)
            .write_capacity_units(self.write_capacity_units)
            .build()
            .map_err(|e| table_error(name, e))?;
        let stream = StreamSpecification::builder()
            .stream_enabled(true)
            .stream_view_type(convert::to_table_view_type(view_type))
            .build()
            .map_err(|e| table_error(name, e))?;

        let out = self
            .client
            .create_table()
            .table_name(name)
            .attribute_definitions(attribute)
            .key_schema(key)
            .provisioned_throughput(throughput)
            .stream_specification(stream)
            .send()
            .await
            .map_err(|e| table_error(name, e))?;

        debug!(table = name, key = key_name, view_type = %view_type, "Create table request accepted");
        out.table_description()
            .map(convert::table_description)
            .ok_or_else(|| StreamError::table_unavailable(name, "empty table description"))
    }

    async fn wait_until_exists(&self, table: &TableRef) -> Result<TableDescription> {
        self.client
            .wait_until_table_exists()
            .table_name(table.as_str())
            .wait(self.wait_timeout)
            .await
            .map_err(|e| table_error(table.as_str(), e))?;

        self.describe_table(table).await
    }

    async fn put_item(&self, table: &TableRef, item: Item) -> Result<Item> {
        let out = self
            .client
            .put_item()
            .table_name(table.as_str())
            .set_item(Some(convert::to_table_item(&item)))
            .return_values(ReturnValue::AllOld)
            .send()
            .await
            .map_err(|e| table_error(table.as_str(), e))?;

        Ok(out
            .attributes()
            .map(convert::from_table_item)
            .unwrap_or_default())
    }
}

// ============================================================================
// Stream gateway
// ============================================================================

/// [`StreamGateway`] over `aws-sdk-dynamodbstreams`.
#[derive(Clone, Debug)]
pub struct DynamoDbStreamGateway {
    client: aws_sdk_dynamodbstreams::Client,
}

impl DynamoDbStreamGateway {
    pub fn new(client: aws_sdk_dynamodbstreams::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StreamGateway for DynamoDbStreamGateway {
    async fn describe_stream(
        &self,
        stream: &StreamRef,
        exclusive_start_shard_id: Option<&str>,
    ) -> Result<ShardPage> {
        let out = self
            .client
            .describe_stream()
            .stream_arn(stream.as_str())
            .set_exclusive_start_shard_id(exclusive_start_shard_id.map(str::to_string))
            .send()
            .await
            .map_err(|e| {
                StreamError::stream_unavailable(stream.as_str(), DisplayErrorContext(&e).to_string())
            })?;

        let description = out.stream_description().ok_or_else(|| {
            StreamError::stream_unavailable(stream.as_str(), "empty stream description")
        })?;

        Ok(ShardPage {
            shards: description.shards().iter().map(convert::shard).collect(),
            last_evaluated_shard_id: description.last_evaluated_shard_id().map(str::to_string),
        })
    }

    async fn get_shard_iterator(
        &self,
        stream: &StreamRef,
        shard_id: &str,
        position: ShardIteratorType,
    ) -> Result<Cursor> {
        let iterator_type = match position {
            ShardIteratorType::Latest => SdkShardIteratorType::Latest,
        };

        let out = self
            .client
            .get_shard_iterator()
            .stream_arn(stream.as_str())
            .shard_id(shard_id)
            .shard_iterator_type(iterator_type)
            .send()
            .await
            .map_err(|e| {
                StreamError::shard_unavailable(shard_id, DisplayErrorContext(&e).to_string())
            })?;

        out.shard_iterator()
            .map(Cursor::new)
            .ok_or_else(|| StreamError::shard_unavailable(shard_id, "service returned no shard iterator"))
    }

    async fn get_records(&self, cursor: &Cursor, limit: i32) -> Result<RecordBatch> {
        let out = self
            .client
            .get_records()
            .shard_iterator(cursor.as_str())
            .limit(limit)
            .send()
            .await
            .map_err(|e| convert::fetch_error(&e))?;

        Ok(RecordBatch {
            records: out.records().iter().filter_map(convert::change_record).collect(),
            next_cursor: out.next_shard_iterator().map(Cursor::new),
        })
    }
}
