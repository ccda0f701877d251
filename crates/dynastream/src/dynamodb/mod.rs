//! # DynamoDB gateways
//!
//! [`DynamoDbTableGateway`] and [`DynamoDbStreamGateway`] implement the
//! engine's gateway traits over `aws-sdk-dynamodb` and
//! `aws-sdk-dynamodbstreams`. Works against AWS or a local DynamoDB via
//! `endpoint_url`.
//!
//! SDK failures are rendered with their full error context. `GetRecords`
//! failures are classified so the retry policy can tell throttling and
//! transport errors apart from an expired shard iterator.

pub mod convert;
mod client;

pub use client::{
    sdk_config, DynamoDbClients, DynamoDbStreamGateway, DynamoDbTableGateway, DEFAULT_TABLE_WAIT,
};
