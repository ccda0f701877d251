//! Assertions over delivered change records

use dynastream::common::{AttributeValue, ChangeOp, ChangeRecord};

pub trait RecordVecExt {
    /// Values of the `k` key attribute, in delivery order.
    fn keys(&self) -> Vec<String>;

    /// Records read from one shard, in delivery order.
    fn from_shard(&self, shard_id: &str) -> Vec<&ChangeRecord>;

    fn ops(&self) -> Vec<ChangeOp>;

    /// Assert sequence numbers strictly increase within every shard.
    fn assert_ordered_per_shard(&self);
}

impl RecordVecExt for [ChangeRecord] {
    fn keys(&self) -> Vec<String> {
        self.iter()
            .map(|r| match r.key("k") {
                Some(AttributeValue::S(s)) => s.clone(),
                other => panic!("record {} has unexpected key {:?}", r.event_id, other),
            })
            .collect()
    }

    fn from_shard(&self, shard_id: &str) -> Vec<&ChangeRecord> {
        self.iter().filter(|r| r.shard_id == shard_id).collect()
    }

    fn ops(&self) -> Vec<ChangeOp> {
        self.iter().map(|r| r.op).collect()
    }

    fn assert_ordered_per_shard(&self) {
        let mut shards: Vec<&str> = self.iter().map(|r| r.shard_id.as_str()).collect();
        shards.sort_unstable();
        shards.dedup();

        for shard in shards {
            let records = self.from_shard(shard);
            for pair in records.windows(2) {
                assert!(
                    pair[0].sequence_number < pair[1].sequence_number,
                    "shard {} delivered {} before {}",
                    shard,
                    pair[0].sequence_number,
                    pair[1].sequence_number
                );
            }
        }
    }
}
