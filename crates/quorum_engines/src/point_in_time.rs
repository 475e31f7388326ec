#![forbid(unsafe_code)]

use quorum_contracts::change::{ChangeField, ChangeRecord};
use quorum_contracts::dao::{Collection, Nft};
use quorum_contracts::BlockNumber;

/// Value of `field` as of `at`, or `None` when the entity was created after `at`.
///
/// Changes to the field are ordered by block. With none recorded the current value
/// is returned. Otherwise the latest change at or before `at` gives its `new`
/// value; if every change is later, the earliest one gives its `old` value.
pub fn field_at_block<'a>(
    created_at: BlockNumber,
    current: &'a str,
    changes: &'a [ChangeRecord],
    field: &ChangeField,
    at: BlockNumber,
) -> Option<&'a str> {
    if created_at > at {
        return None;
    }
    let mut relevant: Vec<&ChangeRecord> = changes.iter().filter(|c| &c.field == field).collect();
    if relevant.is_empty() {
        return Some(current);
    }
    // Stable sort keeps log order for changes in the same block.
    relevant.sort_by_key(|c| c.block);
    if let Some(last) = relevant.iter().rev().find(|c| c.block <= at) {
        return Some(last.new.as_str());
    }
    relevant.first().map(|c| c.old.as_str())
}

/// Whether any burn was recorded at or before `at`; `None` when not yet created.
pub fn burned_at_block(
    created_at: BlockNumber,
    changes: &[ChangeRecord],
    at: BlockNumber,
) -> Option<bool> {
    if created_at > at {
        return None;
    }
    Some(
        changes
            .iter()
            .any(|c| c.field == ChangeField::Burned && c.block <= at),
    )
}

pub fn collection_issuer_at(collection: &Collection, at: BlockNumber) -> Option<&str> {
    field_at_block(
        collection.block,
        &collection.issuer,
        &collection.changes,
        &ChangeField::Issuer,
        at,
    )
}

pub fn nft_root_owner_at(nft: &Nft, at: BlockNumber) -> Option<&str> {
    field_at_block(
        nft.block,
        &nft.root_owner,
        &nft.changes,
        &ChangeField::RootOwner,
        at,
    )
    .filter(|owner| !owner.is_empty())
}

pub fn nft_burned_at(nft: &Nft, at: BlockNumber) -> Option<bool> {
    burned_at_block(nft.block, &nft.changes, at)
}
