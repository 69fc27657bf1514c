//! Typed records of an on-chain indexed collection and the rules for reading
//! and ordering them.

use std::sync::Arc;

use alloy::{
    dyn_abi::DynSolValue,
    json_abi::Function,
    primitives::{Address, U256},
};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionItem {
    pub id: u64,
    pub content_hash: String,
    pub owner: Address,
    pub incentive_amount: U256,
    /// Title or description supplied at upload.
    pub metadata: String,
}

/// Order in which ids are read from the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOrder {
    Ascending,
    /// Newest first.
    Descending,
}

impl IterationOrder {
    /// Ids `1..=count` in read order, produced lazily.
    pub fn ids(self, count: u64) -> Box<dyn Iterator<Item = u64> + Send> {
        match self {
            Self::Ascending => Box::new(1..=count),
            Self::Descending => Box::new((1..=count).rev()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Id,
    IncentiveAmount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Stable re-sort applied to a completed pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortPolicy {
    pub key: SortKey,
    pub direction: SortDirection,
}

impl SortPolicy {
    pub const fn incentive_descending() -> Self {
        Self {
            key: SortKey::IncentiveAmount,
            direction: SortDirection::Descending,
        }
    }

    /// Items with equal keys keep their read order.
    pub fn apply(&self, items: &mut [CollectionItem]) {
        items.sort_by(|a, b| {
            let ord = match self.key {
                SortKey::Id => a.id.cmp(&b.id),
                SortKey::IncentiveAmount => a.incentive_amount.cmp(&b.incentive_amount),
            };
            match self.direction {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            }
        });
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("missing output `{0}`")]
    MissingField(String),
    #[error("output `{field}` is not a {expected}")]
    WrongType {
        field: String,
        expected: &'static str,
    },
    #[error("requested id {requested} but the record carries id {found}")]
    IdMismatch { requested: u64, found: U256 },
    #[error("empty content hash")]
    EmptyContentHash,
}

/// Names of the item getter's outputs that map onto [`CollectionItem`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFields {
    pub id: String,
    pub content_hash: String,
    pub metadata: String,
    pub owner: String,
    /// Collections without incentives read as zero.
    pub incentive: Option<String>,
}

impl RecordFields {
    /// Decodes one getter result, validating it against the id that was asked for.
    pub fn decode(
        &self,
        requested: u64,
        function: &Function,
        values: &[DynSolValue],
    ) -> Result<CollectionItem, RecordError> {
        let field = |name: &str| {
            function
                .outputs
                .iter()
                .position(|p| p.name == name)
                .and_then(|i| values.get(i))
                .ok_or_else(|| RecordError::MissingField(name.to_string()))
        };
        let uint = |name: &str| {
            field(name)?
                .as_uint()
                .map(|(v, _)| v)
                .ok_or_else(|| RecordError::WrongType {
                    field: name.to_string(),
                    expected: "uint",
                })
        };
        let string = |name: &str| {
            field(name)?
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| RecordError::WrongType {
                    field: name.to_string(),
                    expected: "string",
                })
        };

        let found = uint(&self.id)?;
        if found != U256::from(requested) {
            return Err(RecordError::IdMismatch { requested, found });
        }

        let content_hash = string(&self.content_hash)?;
        if content_hash.trim().is_empty() {
            return Err(RecordError::EmptyContentHash);
        }

        let owner = field(&self.owner)?
            .as_address()
            .ok_or_else(|| RecordError::WrongType {
                field: self.owner.clone(),
                expected: "address",
            })?;

        let incentive_amount = match &self.incentive {
            Some(name) => uint(name)?,
            None => U256::ZERO,
        };

        Ok(CollectionItem {
            id: requested,
            content_hash,
            owner,
            incentive_amount,
            metadata: string(&self.metadata)?,
        })
    }
}

/// How a collection is laid out on-chain and how a pass orders it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSpec {
    pub count_method: String,
    pub item_method: String,
    pub order: IterationOrder,
    pub sort: Option<SortPolicy>,
    pub fields: RecordFields,
}

impl CollectionSpec {
    /// Image registry: read oldest first, then rank by tips received.
    pub fn media_registry() -> Self {
        Self {
            count_method: "imageCount".into(),
            item_method: "images".into(),
            order: IterationOrder::Ascending,
            sort: Some(SortPolicy::incentive_descending()),
            fields: RecordFields {
                id: "id".into(),
                content_hash: "hash".into(),
                metadata: "description".into(),
                owner: "author".into(),
                incentive: Some("tipAmount".into()),
            },
        }
    }

    /// Video registry: newest first, no re-sort.
    pub fn video_registry() -> Self {
        Self {
            count_method: "videoCount".into(),
            item_method: "videos".into(),
            order: IterationOrder::Descending,
            sort: None,
            fields: RecordFields {
                id: "id".into(),
                content_hash: "hash".into(),
                metadata: "title".into(),
                owner: "author".into(),
                incentive: None,
            },
        }
    }
}

/// Result of one complete synchronization pass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CollectionSnapshot {
    pub items: Arc<Vec<CollectionItem>>,
    /// Count read at the start of the pass.
    pub count: u64,
}

impl CollectionSnapshot {
    pub fn new(items: Vec<CollectionItem>, count: u64) -> Self {
        Self {
            items: Arc::new(items),
            count,
        }
    }

    pub fn ids(&self) -> Vec<u64> {
        self.items.iter().map(|item| item.id).collect()
    }

    pub fn get(&self, id: u64) -> Option<&CollectionItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Highest id in the snapshot.
    pub fn latest(&self) -> Option<&CollectionItem> {
        self.items.iter().max_by_key(|item| item.id)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::json_abi::Function;

    fn item(id: u64, tip: u64) -> CollectionItem {
        CollectionItem {
            id,
            content_hash: format!("Qm{id}"),
            owner: Address::ZERO,
            incentive_amount: U256::from(tip),
            metadata: String::new(),
        }
    }

    fn images_getter() -> Function {
        Function::parse(
            "images(uint256) returns (uint256 id, string hash, string description, uint256 tipAmount, address author)",
        )
        .unwrap()
    }

    fn image_values(id: u64, hash: &str) -> Vec<DynSolValue> {
        vec![
            DynSolValue::Uint(U256::from(id), 256),
            DynSolValue::String(hash.into()),
            DynSolValue::String("sunset".into()),
            DynSolValue::Uint(U256::from(42), 256),
            DynSolValue::Address(Address::repeat_byte(0x11)),
        ]
    }

    #[test]
    fn iteration_order_yields_contiguous_ids() {
        assert_eq!(IterationOrder::Ascending.ids(3).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(IterationOrder::Descending.ids(3).collect::<Vec<_>>(), vec![3, 2, 1]);
        assert_eq!(IterationOrder::Ascending.ids(0).count(), 0);
        assert_eq!(IterationOrder::Descending.ids(u64::MAX).next(), Some(u64::MAX));
    }

    #[test]
    fn incentive_sort_is_stable() {
        let mut items = vec![item(3, 5), item(2, 20), item(1, 5)];
        SortPolicy::incentive_descending().apply(&mut items);
        assert_eq!(items.iter().map(|i| i.id).collect::<Vec<_>>(), vec![2, 3, 1]);
    }

    #[test]
    fn ascending_sort_keeps_ties_in_read_order() {
        let mut items = vec![item(4, 1), item(1, 0), item(2, 1), item(3, 0)];
        SortPolicy {
            key: SortKey::IncentiveAmount,
            direction: SortDirection::Ascending,
        }
        .apply(&mut items);
        assert_eq!(items.iter().map(|i| i.id).collect::<Vec<_>>(), vec![1, 3, 4, 2]);
    }

    #[test]
    fn record_decodes_by_output_name() {
        let fields = CollectionSpec::media_registry().fields;
        let record = fields
            .decode(7, &images_getter(), &image_values(7, "QmHash"))
            .unwrap();

        assert_eq!(record.id, 7);
        assert_eq!(record.content_hash, "QmHash");
        assert_eq!(record.metadata, "sunset");
        assert_eq!(record.incentive_amount, U256::from(42));
        assert_eq!(record.owner, Address::repeat_byte(0x11));
    }

    #[test]
    fn record_with_foreign_id_is_rejected() {
        let fields = CollectionSpec::media_registry().fields;
        let err = fields
            .decode(2, &images_getter(), &image_values(0, "QmHash"))
            .unwrap_err();
        assert_eq!(
            err,
            RecordError::IdMismatch {
                requested: 2,
                found: U256::ZERO
            }
        );
    }

    #[test]
    fn record_without_hash_is_rejected() {
        let fields = CollectionSpec::media_registry().fields;
        let err = fields
            .decode(1, &images_getter(), &image_values(1, ""))
            .unwrap_err();
        assert_eq!(err, RecordError::EmptyContentHash);
    }

    #[test]
    fn getter_missing_a_field_is_rejected() {
        let fields = CollectionSpec::video_registry().fields;
        let err = fields
            .decode(1, &images_getter(), &image_values(1, "QmHash"))
            .unwrap_err();
        assert_eq!(err, RecordError::MissingField("title".into()));
    }

    #[test]
    fn latest_is_highest_id() {
        let snapshot = CollectionSnapshot::new(vec![item(2, 0), item(3, 0), item(1, 0)], 3);
        assert_eq!(snapshot.latest().map(|i| i.id), Some(3));
        assert!(CollectionSnapshot::default().latest().is_none());
    }
}
