//! Key schema codec for the single-table layout.
//!
//! Every entity lives in one physical table addressed by a partition key
//! (PK) and sort key (SK). Composite keys are built from type-prefixed
//! segments joined by `#`; identifiers are validated on input to exclude
//! the delimiter, which keeps the mapping collision-free and the inverse
//! parse unambiguous.
//!
//! | Entity          | PK                               | SK                                  |
//! |-----------------|----------------------------------|-------------------------------------|
//! | User meta       | `USER#<id>`                      | `META`                              |
//! | Account         | `USER#<id>`                      | `ACCOUNT`                           |
//! | Token           | `USER#<id>`                      | `TOKEN#<tokenId>`                   |
//! | Address         | `USER#<id>`                      | `ADDRESS#<addrId>`                  |
//! | Cart            | `CART#<userId>` / `CART#GUEST#<sessionId>` | `META` / `ITEM#<itemId>`  |
//! | Order           | `USER#<userId>#ORDER#<orderId>` (+ locator `ORDER#<orderId>`) | `META`, `ITEM#<itemId>`, `PAYMENT`, `DISCOUNT` |
//! | Warehouse       | `WAREHOUSE#<id>`                 | `META`                              |
//! | Inventory line  | `WAREHOUSE#<id>`                 | `PRODUCT#<pid>[#VARIANT#<vid>]`     |
//! | Coupon          | `COUPON#<code>`                  | `META`, `USAGE#<orderId>`           |

use crate::errors::{CoreError, CoreResult};

/// Segment delimiter; never permitted inside an identifier.
pub const DELIMITER: char = '#';

/// Sort key for singleton meta records.
pub const META_SK: &str = "META";
/// Sort key for the account record under a user partition.
pub const ACCOUNT_SK: &str = "ACCOUNT";
/// Sort key for an order's payment record.
pub const PAYMENT_SK: &str = "PAYMENT";
/// Sort key for an order's discount record.
pub const DISCOUNT_SK: &str = "DISCOUNT";

/// Sort-key prefix shared by cart items and order items.
pub const ITEM_PREFIX: &str = "ITEM#";
/// Sort-key prefix for coupon usage records.
pub const USAGE_PREFIX: &str = "USAGE#";
/// Sort-key prefix for token records.
pub const TOKEN_PREFIX: &str = "TOKEN#";
/// Sort-key prefix for address records.
pub const ADDRESS_PREFIX: &str = "ADDRESS#";
/// Sort-key prefix for inventory lines.
pub const PRODUCT_PREFIX: &str = "PRODUCT#";

fn validate_id(kind: &str, id: &str) -> CoreResult<()> {
    if id.is_empty() {
        return Err(CoreError::invalid(format!("{kind} id must not be empty")));
    }
    if id.contains(DELIMITER) {
        return Err(CoreError::invalid(format!(
            "{kind} id must not contain '{DELIMITER}': {id}"
        )));
    }
    Ok(())
}

/// `USER#<id>`
pub fn user_pk(user_id: &str) -> CoreResult<String> {
    validate_id("user", user_id)?;
    Ok(format!("USER#{user_id}"))
}

/// `TOKEN#<tokenId>`
pub fn token_sk(token_id: &str) -> CoreResult<String> {
    validate_id("token", token_id)?;
    Ok(format!("TOKEN#{token_id}"))
}

/// `ADDRESS#<addrId>`
pub fn address_sk(address_id: &str) -> CoreResult<String> {
    validate_id("address", address_id)?;
    Ok(format!("ADDRESS#{address_id}"))
}

/// `CART#<userId>`
pub fn cart_pk(user_id: &str) -> CoreResult<String> {
    validate_id("user", user_id)?;
    Ok(format!("CART#{user_id}"))
}

/// `CART#GUEST#<sessionId>`
pub fn guest_cart_pk(session_id: &str) -> CoreResult<String> {
    validate_id("session", session_id)?;
    Ok(format!("CART#GUEST#{session_id}"))
}

/// `USER#<userId>#ORDER#<orderId>` — the canonical order partition.
pub fn user_order_pk(user_id: &str, order_id: &str) -> CoreResult<String> {
    validate_id("user", user_id)?;
    validate_id("order", order_id)?;
    Ok(format!("USER#{user_id}#ORDER#{order_id}"))
}

/// `ORDER#<orderId>` — the secondary locator partition.
pub fn order_pk(order_id: &str) -> CoreResult<String> {
    validate_id("order", order_id)?;
    Ok(format!("ORDER#{order_id}"))
}

/// `USER#<userId>#ORDER#` — prefix matching all of a user's order partitions.
pub fn user_order_pk_prefix(user_id: &str) -> CoreResult<String> {
    validate_id("user", user_id)?;
    Ok(format!("USER#{user_id}#ORDER#"))
}

/// `ITEM#<itemId>`
pub fn item_sk(item_id: &str) -> CoreResult<String> {
    validate_id("item", item_id)?;
    Ok(format!("ITEM#{item_id}"))
}

/// `WAREHOUSE#<id>`
pub fn warehouse_pk(warehouse_id: &str) -> CoreResult<String> {
    validate_id("warehouse", warehouse_id)?;
    Ok(format!("WAREHOUSE#{warehouse_id}"))
}

/// `PRODUCT#<pid>` or `PRODUCT#<pid>#VARIANT#<vid>`
pub fn inventory_sk(product_id: &str, variant_id: Option<&str>) -> CoreResult<String> {
    validate_id("product", product_id)?;
    match variant_id {
        Some(vid) => {
            validate_id("variant", vid)?;
            Ok(format!("PRODUCT#{product_id}#VARIANT#{vid}"))
        }
        None => Ok(format!("PRODUCT#{product_id}")),
    }
}

/// `COUPON#<code>` — the code is expected to be normalized already.
pub fn coupon_pk(coupon_code: &str) -> CoreResult<String> {
    validate_id("coupon", coupon_code)?;
    Ok(format!("COUPON#{coupon_code}"))
}

/// `USAGE#<orderId>`
pub fn coupon_usage_sk(order_id: &str) -> CoreResult<String> {
    validate_id("order", order_id)?;
    Ok(format!("USAGE#{order_id}"))
}

// -----------------------------------------------------------------------------
// Inverse parsers
// -----------------------------------------------------------------------------

/// Extracts the item id from an `ITEM#<id>` sort key.
pub fn item_id_from_sk(sk: &str) -> Option<&str> {
    sk.strip_prefix(ITEM_PREFIX).filter(|rest| !rest.is_empty())
}

/// Extracts the order id from a `USAGE#<orderId>` sort key.
pub fn order_id_from_usage_sk(sk: &str) -> Option<&str> {
    sk.strip_prefix(USAGE_PREFIX).filter(|rest| !rest.is_empty())
}

/// Extracts `(userId, orderId)` from a `USER#<uid>#ORDER#<oid>` partition key.
pub fn ids_from_user_order_pk(pk: &str) -> Option<(&str, &str)> {
    let rest = pk.strip_prefix("USER#")?;
    let (user_id, order_id) = rest.split_once("#ORDER#")?;
    if user_id.is_empty() || order_id.is_empty() || order_id.contains(DELIMITER) {
        return None;
    }
    Some((user_id, order_id))
}

/// Extracts the warehouse id from a `WAREHOUSE#<id>` partition key.
pub fn warehouse_id_from_pk(pk: &str) -> Option<&str> {
    pk.strip_prefix("WAREHOUSE#").filter(|rest| !rest.is_empty())
}

/// Extracts `(productId, variantId)` from an inventory sort key.
pub fn ids_from_inventory_sk(sk: &str) -> Option<(&str, Option<&str>)> {
    let rest = sk.strip_prefix(PRODUCT_PREFIX)?;
    if rest.is_empty() {
        return None;
    }
    match rest.split_once("#VARIANT#") {
        Some((pid, vid)) if !pid.is_empty() && !vid.is_empty() => Some((pid, Some(vid))),
        Some(_) => None,
        None => {
            if rest.contains(DELIMITER) {
                None
            } else {
                Some((rest, None))
            }
        }
    }
}

/// Extracts the coupon code from a `COUPON#<code>` partition key.
pub fn coupon_code_from_pk(pk: &str) -> Option<&str> {
    pk.strip_prefix("COUPON#").filter(|rest| !rest.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_entity_keys() {
        assert_eq!(user_pk("u1").unwrap(), "USER#u1");
        assert_eq!(cart_pk("u1").unwrap(), "CART#u1");
        assert_eq!(guest_cart_pk("s9").unwrap(), "CART#GUEST#s9");
        assert_eq!(user_order_pk("u1", "o1").unwrap(), "USER#u1#ORDER#o1");
        assert_eq!(order_pk("o1").unwrap(), "ORDER#o1");
        assert_eq!(warehouse_pk("w1").unwrap(), "WAREHOUSE#w1");
        assert_eq!(inventory_sk("p1", None).unwrap(), "PRODUCT#p1");
        assert_eq!(
            inventory_sk("p1", Some("v2")).unwrap(),
            "PRODUCT#p1#VARIANT#v2"
        );
        assert_eq!(coupon_pk("SAVE10").unwrap(), "COUPON#SAVE10");
        assert_eq!(coupon_usage_sk("o1").unwrap(), "USAGE#o1");
        assert_eq!(item_sk("i1").unwrap(), "ITEM#i1");
        assert_eq!(token_sk("t1").unwrap(), "TOKEN#t1");
        assert_eq!(address_sk("a1").unwrap(), "ADDRESS#a1");
    }

    #[test]
    fn rejects_malformed_identifiers() {
        assert!(user_pk("").is_err());
        assert!(user_pk("a#b").is_err());
        assert!(inventory_sk("p1", Some("v#2")).is_err());
        assert!(coupon_pk("SAVE#10").is_err());
        assert!(user_order_pk("u1", "").is_err());
    }

    #[test]
    fn parses_inverse() {
        assert_eq!(item_id_from_sk("ITEM#abc"), Some("abc"));
        assert_eq!(item_id_from_sk("META"), None);
        assert_eq!(item_id_from_sk("ITEM#"), None);

        assert_eq!(order_id_from_usage_sk("USAGE#o7"), Some("o7"));
        assert_eq!(
            ids_from_user_order_pk("USER#u1#ORDER#o1"),
            Some(("u1", "o1"))
        );
        assert_eq!(ids_from_user_order_pk("ORDER#o1"), None);

        assert_eq!(warehouse_id_from_pk("WAREHOUSE#w2"), Some("w2"));
        assert_eq!(ids_from_inventory_sk("PRODUCT#p1"), Some(("p1", None)));
        assert_eq!(
            ids_from_inventory_sk("PRODUCT#p1#VARIANT#v2"),
            Some(("p1", Some("v2")))
        );
        assert_eq!(ids_from_inventory_sk("META"), None);
        assert_eq!(coupon_code_from_pk("COUPON#SAVE10"), Some("SAVE10"));
    }

    #[test]
    fn round_trips() {
        let pk = user_order_pk("user-42", "order-99").unwrap();
        assert_eq!(ids_from_user_order_pk(&pk), Some(("user-42", "order-99")));

        let sk = inventory_sk("prod-1", Some("var-1")).unwrap();
        assert_eq!(ids_from_inventory_sk(&sk), Some(("prod-1", Some("var-1"))));
    }
}
