//! Conversions between SDK shapes and dynastream types.

use crate::common::{
    AttributeValue, ChangeOp, ChangeRecord, FetchFailureKind, Item, SequenceNumberRange, Shard,
    StreamError, StreamRef, StreamViewType, TableDescription,
};
use aws_sdk_dynamodb::primitives::Blob;
use aws_sdk_dynamodb::types as ddb;
use aws_sdk_dynamodbstreams::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodbstreams::operation::get_records::GetRecordsError;
use aws_sdk_dynamodbstreams::types as streams;
use std::collections::HashMap;
use tracing::warn;

// ============================================================================
// Attribute values
// ============================================================================

/// Convert a table-service attribute value.
///
/// Variants newer than this crate become `NULL`.
pub fn from_table_value(value: &ddb::AttributeValue) -> AttributeValue {
    match value {
        ddb::AttributeValue::S(s) => AttributeValue::S(s.clone()),
        ddb::AttributeValue::N(n) => AttributeValue::N(n.clone()),
        ddb::AttributeValue::B(b) => AttributeValue::B(b.as_ref().to_vec()),
        ddb::AttributeValue::Bool(b) => AttributeValue::Bool(*b),
        ddb::AttributeValue::Null(b) => AttributeValue::Null(*b),
        ddb::AttributeValue::M(m) => AttributeValue::M(from_table_item(m)),
        ddb::AttributeValue::L(l) => AttributeValue::L(l.iter().map(from_table_value).collect()),
        ddb::AttributeValue::Ss(ss) => AttributeValue::Ss(ss.clone()),
        ddb::AttributeValue::Ns(ns) => AttributeValue::Ns(ns.clone()),
        ddb::AttributeValue::Bs(bs) => {
            AttributeValue::Bs(bs.iter().map(|b| b.as_ref().to_vec()).collect())
        }
        _ => AttributeValue::Null(true),
    }
}

pub fn from_table_item(item: &HashMap<String, ddb::AttributeValue>) -> Item {
    item.iter()
        .map(|(k, v)| (k.clone(), from_table_value(v)))
        .collect()
}

pub fn to_table_value(value: &AttributeValue) -> ddb::AttributeValue {
    match value {
        AttributeValue::S(s) => ddb::AttributeValue::S(s.clone()),
        AttributeValue::N(n) => ddb::AttributeValue::N(n.clone()),
        AttributeValue::B(b) => ddb::AttributeValue::B(Blob::new(b.clone())),
        AttributeValue::Bool(b) => ddb::AttributeValue::Bool(*b),
        AttributeValue::Null(b) => ddb::AttributeValue::Null(*b),
        AttributeValue::M(m) => ddb::AttributeValue::M(to_table_item(m)),
        AttributeValue::L(l) => ddb::AttributeValue::L(l.iter().map(to_table_value).collect()),
        AttributeValue::Ss(ss) => ddb::AttributeValue::Ss(ss.clone()),
        AttributeValue::Ns(ns) => ddb::AttributeValue::Ns(ns.clone()),
        AttributeValue::Bs(bs) => {
            ddb::AttributeValue::Bs(bs.iter().map(|b| Blob::new(b.clone())).collect())
        }
    }
}

pub fn to_table_item(item: &Item) -> HashMap<String, ddb::AttributeValue> {
    item.iter()
        .map(|(k, v)| (k.clone(), to_table_value(v)))
        .collect()
}

/// Convert a stream attribute value.
pub fn from_stream_value(value: &streams::AttributeValue) -> AttributeValue {
    match value {
        streams::AttributeValue::S(s) => AttributeValue::S(s.clone()),
        streams::AttributeValue::N(n) => AttributeValue::N(n.clone()),
        streams::AttributeValue::B(b) => AttributeValue::B(b.as_ref().to_vec()),
        streams::AttributeValue::Bool(b) => AttributeValue::Bool(*b),
        streams::AttributeValue::Null(b) => AttributeValue::Null(*b),
        streams::AttributeValue::M(m) => AttributeValue::M(from_stream_item(m)),
        streams::AttributeValue::L(l) => {
            AttributeValue::L(l.iter().map(from_stream_value).collect())
        }
        streams::AttributeValue::Ss(ss) => AttributeValue::Ss(ss.clone()),
        streams::AttributeValue::Ns(ns) => AttributeValue::Ns(ns.clone()),
        streams::AttributeValue::Bs(bs) => {
            AttributeValue::Bs(bs.iter().map(|b| b.as_ref().to_vec()).collect())
        }
        _ => AttributeValue::Null(true),
    }
}

pub fn from_stream_item(item: &HashMap<String, streams::AttributeValue>) -> Item {
    item.iter()
        .map(|(k, v)| (k.clone(), from_stream_value(v)))
        .collect()
}

// ============================================================================
// Descriptions
// ============================================================================

pub fn table_description(desc: &ddb::TableDescription) -> TableDescription {
    let spec = desc.stream_specification();
    let enabled = spec.map(|s| s.stream_enabled()).unwrap_or(true);

    TableDescription {
        table_name: desc.table_name().unwrap_or_default().to_string(),
        table_arn: desc.table_arn().map(str::to_string),
        status: desc.table_status().map(|s| s.as_str().to_string()),
        stream_ref: desc
            .latest_stream_arn()
            .filter(|_| enabled)
            .map(StreamRef::new),
        stream_view_type: spec
            .and_then(|s| s.stream_view_type())
            .and_then(|v| v.as_str().parse().ok()),
    }
}

pub fn to_table_view_type(view_type: StreamViewType) -> ddb::StreamViewType {
    ddb::StreamViewType::from(view_type.as_str())
}

pub fn shard(shard: &streams::Shard) -> Shard {
    Shard {
        shard_id: shard.shard_id().unwrap_or_default().to_string(),
        parent_shard_id: shard.parent_shard_id().map(str::to_string),
        sequence_range: shard
            .sequence_number_range()
            .map(|r| SequenceNumberRange {
                starting: r.starting_sequence_number().map(str::to_string),
                ending: r.ending_sequence_number().map(str::to_string),
            })
            .unwrap_or_default(),
    }
}

// ============================================================================
// Records
// ============================================================================

/// Convert a stream record. Records with an unknown event name or without a
/// stream payload are skipped.
pub fn change_record(record: &streams::Record) -> Option<ChangeRecord> {
    let op = match record.event_name() {
        Some(streams::OperationType::Insert) => ChangeOp::Insert,
        Some(streams::OperationType::Modify) => ChangeOp::Modify,
        Some(streams::OperationType::Remove) => ChangeOp::Remove,
        other => {
            warn!(event_id = ?record.event_id(), event_name = ?other, "Skipping record with unknown event name");
            return None;
        }
    };
    let Some(payload) = record.dynamodb() else {
        warn!(event_id = ?record.event_id(), "Skipping record without stream payload");
        return None;
    };

    Some(ChangeRecord {
        event_id: record.event_id().unwrap_or_default().to_string(),
        op,
        // Stamped by the poller that read the record
        shard_id: String::new(),
        sequence_number: payload.sequence_number().unwrap_or_default().to_string(),
        approximate_creation_time: payload.approximate_creation_date_time().map(|t| t.secs()),
        keys: payload.keys().map(from_stream_item).unwrap_or_default(),
        new_image: payload.new_image().map(from_stream_item),
        old_image: payload.old_image().map(from_stream_item),
        view_type: payload
            .stream_view_type()
            .and_then(|v| v.as_str().parse().ok()),
        size_bytes: payload.size_bytes(),
    })
}

// ============================================================================
// Errors
// ============================================================================

/// Classify a failed `GetRecords` call.
pub fn fetch_error(err: &SdkError<GetRecordsError>) -> StreamError {
    let kind = match err {
        SdkError::TimeoutError(_) => FetchFailureKind::Timeout,
        SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => FetchFailureKind::Transport,
        SdkError::ServiceError(service) => service_failure_kind(service.err()),
        _ => FetchFailureKind::Transport,
    };
    StreamError::fetch(kind, DisplayErrorContext(err).to_string())
}

fn service_failure_kind(err: &GetRecordsError) -> FetchFailureKind {
    match err {
        GetRecordsError::ExpiredIteratorException(_)
        | GetRecordsError::TrimmedDataAccessException(_) => FetchFailureKind::ExpiredCursor,
        GetRecordsError::LimitExceededException(_) => FetchFailureKind::Throttled,
        other if is_throttling_code(other.code()) => FetchFailureKind::Throttled,
        _ => FetchFailureKind::Service,
    }
}

fn is_throttling_code(code: Option<&str>) -> bool {
    matches!(
        code,
        Some("ThrottlingException" | "ProvisionedThroughputExceededException" | "RequestLimitExceeded")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_dynamodbstreams::error::ErrorMetadata;
    use aws_sdk_dynamodbstreams::primitives::DateTime;
    use aws_sdk_dynamodbstreams::types::error::{
        ExpiredIteratorException, LimitExceededException, ResourceNotFoundException,
        TrimmedDataAccessException,
    };
    use aws_smithy_runtime_api::client::orchestrator::HttpResponse;
    use aws_smithy_runtime_api::client::result::ConnectorError;
    use aws_smithy_runtime_api::http::StatusCode;
    use aws_smithy_types::body::SdkBody;

    fn service_error(err: GetRecordsError, status: u16) -> SdkError<GetRecordsError> {
        let raw = HttpResponse::new(StatusCode::try_from(status).unwrap(), SdkBody::empty());
        SdkError::service_error(err, raw)
    }

    fn kind_of(err: &SdkError<GetRecordsError>) -> FetchFailureKind {
        fetch_error(err).fetch_kind().unwrap()
    }

    fn generic(code: &str) -> GetRecordsError {
        GetRecordsError::generic(ErrorMetadata::builder().code(code).message("rejected").build())
    }

    #[test]
    fn test_table_value_round_trip() {
        let item = Item::from([
            ("sampleKey".to_string(), AttributeValue::S("789".to_string())),
            (
                "data".to_string(),
                AttributeValue::M(HashMap::from([(
                    "publishingSite".to_string(),
                    AttributeValue::S("dplay.no".to_string()),
                )])),
            ),
            ("blob".to_string(), AttributeValue::B(vec![0, 1, 2])),
            ("tags".to_string(), AttributeValue::Ss(vec!["a".to_string()])),
        ]);

        let sdk = to_table_item(&item);
        assert_eq!(sdk["sampleKey"], ddb::AttributeValue::S("789".to_string()));
        assert_eq!(from_table_item(&sdk), item);
    }

    #[test]
    fn test_change_record_from_stream() {
        let payload = streams::StreamRecord::builder()
            .keys("k", streams::AttributeValue::S("1".to_string()))
            .new_image("k", streams::AttributeValue::S("1".to_string()))
            .new_image("n", streams::AttributeValue::N("5".to_string()))
            .sequence_number("000000000000000000042")
            .size_bytes(17)
            .stream_view_type(streams::StreamViewType::NewImage)
            .approximate_creation_date_time(DateTime::from_secs(1_700_000_000))
            .build();
        let record = streams::Record::builder()
            .event_id("evt-1")
            .event_name(streams::OperationType::Insert)
            .dynamodb(payload)
            .build();

        let converted = change_record(&record).unwrap();
        assert_eq!(converted.op, ChangeOp::Insert);
        assert_eq!(converted.sequence_number, "000000000000000000042");
        assert_eq!(converted.approximate_creation_time, Some(1_700_000_000));
        assert_eq!(converted.view_type, Some(StreamViewType::NewImage));
        assert_eq!(converted.size_bytes, Some(17));
        assert_eq!(
            converted.new_image.unwrap()["n"],
            AttributeValue::N("5".to_string())
        );
        assert!(converted.old_image.is_none());
    }

    #[test]
    fn test_record_without_payload_is_skipped() {
        let record = streams::Record::builder()
            .event_id("evt-2")
            .event_name(streams::OperationType::Remove)
            .build();
        assert!(change_record(&record).is_none());
    }

    #[test]
    fn test_shard_conversion() {
        let sdk = streams::Shard::builder()
            .shard_id("shardId-2")
            .parent_shard_id("shardId-1")
            .sequence_number_range(
                streams::SequenceNumberRange::builder()
                    .starting_sequence_number("100")
                    .build(),
            )
            .build();
        let converted = shard(&sdk);
        assert_eq!(converted.shard_id, "shardId-2");
        assert_eq!(converted.parent_shard_id.as_deref(), Some("shardId-1"));
        assert_eq!(converted.sequence_range.starting.as_deref(), Some("100"));
        assert!(converted.sequence_range.ending.is_none());
    }

    #[test]
    fn test_stale_cursor_errors_are_expired() {
        let expired = GetRecordsError::ExpiredIteratorException(
            ExpiredIteratorException::builder().message("iterator expired").build(),
        );
        let trimmed = GetRecordsError::TrimmedDataAccessException(
            TrimmedDataAccessException::builder().message("trimmed").build(),
        );
        assert_eq!(service_failure_kind(&expired), FetchFailureKind::ExpiredCursor);
        assert_eq!(service_failure_kind(&trimmed), FetchFailureKind::ExpiredCursor);
        assert_eq!(kind_of(&service_error(expired, 400)), FetchFailureKind::ExpiredCursor);
    }

    #[test]
    fn test_throttling_errors() {
        let limit = GetRecordsError::LimitExceededException(
            LimitExceededException::builder().message("slow down").build(),
        );
        assert_eq!(service_failure_kind(&limit), FetchFailureKind::Throttled);

        for code in [
            "ThrottlingException",
            "ProvisionedThroughputExceededException",
            "RequestLimitExceeded",
        ] {
            assert_eq!(service_failure_kind(&generic(code)), FetchFailureKind::Throttled, "{code}");
        }
        assert_eq!(
            kind_of(&service_error(generic("ThrottlingException"), 400)),
            FetchFailureKind::Throttled
        );
    }

    #[test]
    fn test_other_service_errors() {
        let missing = GetRecordsError::ResourceNotFoundException(
            ResourceNotFoundException::builder().message("no stream").build(),
        );
        assert_eq!(service_failure_kind(&missing), FetchFailureKind::Service);
        assert_eq!(
            kind_of(&service_error(generic("ValidationException"), 400)),
            FetchFailureKind::Service
        );
        assert!(!is_throttling_code(None));
    }

    #[test]
    fn test_transport_level_errors() {
        let timeout = SdkError::<GetRecordsError>::timeout_error("read timed out");
        assert_eq!(kind_of(&timeout), FetchFailureKind::Timeout);

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let dispatch = SdkError::<GetRecordsError>::dispatch_failure(ConnectorError::io(io.into()));
        assert_eq!(kind_of(&dispatch), FetchFailureKind::Transport);

        let garbled = SdkError::<GetRecordsError>::response_error(
            "unparseable body",
            HttpResponse::new(StatusCode::try_from(200).unwrap(), SdkBody::empty()),
        );
        assert_eq!(kind_of(&garbled), FetchFailureKind::Transport);
    }

    #[test]
    fn test_fetch_error_keeps_context() {
        let err = fetch_error(&service_error(generic("ThrottlingException"), 400));
        assert!(err.is_retriable());
        assert!(err.to_string().contains("ThrottlingException"));
    }

    #[test]
    fn test_view_type_mapping() {
        for view in [
            StreamViewType::KeysOnly,
            StreamViewType::NewImage,
            StreamViewType::OldImage,
            StreamViewType::NewAndOldImages,
        ] {
            assert_eq!(to_table_view_type(view).as_str(), view.as_str());
        }
    }
}
