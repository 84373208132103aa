//! Pure planning helpers shared by the ledger and both stores: item validation, merging of
//! duplicate lines, and translation of an order change into signed stock movements.

use crate::error::{LedgerError, LedgerResult};
use crate::model::{Contact, ContactPatch, OrderItem};
use std::collections::BTreeMap;

/// Upper bound for the merged quantity of a single product on one order.
pub const MAX_LINE_QUANTITY: i64 = 10_000;

/// Per-product quantities keyed by product id. `BTreeMap` keeps iteration in product order,
/// which is also the lock order used by the Postgres store.
pub type ItemMap = BTreeMap<String, i64>;

pub fn validate_company_id(company_id: &str) -> LedgerResult<String> {
    let trimmed = company_id.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::validation("invalid_company_id", "companyId cannot be empty"));
    }
    Ok(trimmed.to_string())
}

pub fn validate_product_id(product_id: &str) -> LedgerResult<String> {
    let trimmed = product_id.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::validation("invalid_product_id", "productId cannot be empty"));
    }
    Ok(trimmed.to_string())
}

/// Validate requested lines and merge duplicates by summing their quantities.
pub fn normalize_items(items: &[OrderItem]) -> LedgerResult<ItemMap> {
    if items.is_empty() {
        return Err(LedgerError::validation("empty_order", "items cannot be empty"));
    }
    let mut merged = ItemMap::new();
    for item in items {
        let product_id = validate_product_id(&item.product_id)?;
        if item.quantity <= 0 {
            return Err(LedgerError::validation(
                "invalid_quantity",
                format!("Quantity for product {product_id} must be a positive integer"),
            ));
        }
        let total = merged.entry(product_id.clone()).or_insert(0);
        *total = total
            .checked_add(item.quantity)
            .filter(|q| *q <= MAX_LINE_QUANTITY)
            .ok_or_else(|| {
                LedgerError::validation(
                    "quantity_too_large",
                    format!("Quantity for product {product_id} exceeds {MAX_LINE_QUANTITY}"),
                )
            })?;
    }
    Ok(merged)
}

/// Merge already-stored lines without validation.
pub fn merge_items(items: &[OrderItem]) -> ItemMap {
    let mut merged = ItemMap::new();
    for item in items {
        *merged.entry(item.product_id.clone()).or_insert(0) += item.quantity;
    }
    merged
}

pub fn items_from_map(merged: &ItemMap) -> Vec<OrderItem> {
    merged.iter().map(|(pid, qty)| OrderItem::new(pid.clone(), *qty)).collect()
}

/// Signed stock movement needed to go from `held` (currently reserved by an order) to `wanted`.
/// Negative entries consume stock, positive entries give it back; unchanged products are
/// omitted.
pub fn stock_movements(held: &ItemMap, wanted: &ItemMap) -> ItemMap {
    let mut movements = ItemMap::new();
    for product_id in held.keys().chain(wanted.keys()) {
        if movements.contains_key(product_id) {
            continue;
        }
        let diff = held.get(product_id).copied().unwrap_or(0) - wanted.get(product_id).copied().unwrap_or(0);
        if diff != 0 {
            movements.insert(product_id.clone(), diff);
        }
    }
    movements
}

/// Movement consuming every requested quantity.
pub fn consume_all(wanted: &ItemMap) -> ItemMap {
    wanted.iter().map(|(pid, qty)| (pid.clone(), -qty)).collect()
}

pub fn validate_contact(contact: &Contact) -> LedgerResult<Contact> {
    let company_name = contact.company_name.trim();
    if company_name.chars().count() < 2 {
        return Err(LedgerError::validation("invalid_company_name", "companyName must have at least 2 characters"));
    }
    let region = contact.region.trim();
    if region.chars().count() < 2 {
        return Err(LedgerError::validation("invalid_region", "region must have at least 2 characters"));
    }
    let email = contact.email.trim();
    if !looks_like_email(email) {
        return Err(LedgerError::validation("invalid_email", format!("'{email}' is not a valid email address")));
    }
    Ok(Contact { company_name: company_name.to_string(), email: email.to_string(), region: region.to_string() })
}

/// Overlay `patch` on the stored contact and validate the result. An empty patch keeps the
/// stored contact untouched.
pub fn apply_contact_patch(current: &Contact, patch: &ContactPatch) -> LedgerResult<Contact> {
    if patch.is_empty() {
        return Ok(current.clone());
    }
    let merged = Contact {
        company_name: patch.company_name.clone().unwrap_or_else(|| current.company_name.clone()),
        email: patch.email.clone().unwrap_or_else(|| current.email.clone()),
        region: patch.region.clone().unwrap_or_else(|| current.region.clone()),
    };
    validate_contact(&merged)
}

fn looks_like_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else { return false };
    !local.is_empty()
        && !email.chars().any(char::is_whitespace)
        && !domain.contains('@')
        && domain.split('.').count() >= 2
        && domain.split('.').all(|label| !label.is_empty())
}
