use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_with::{serde_as, DefaultOnNull};

use std::{fs, path::Path, str::FromStr};

use crate::amount::{parse_decimal, Amount};

/// One page of the receipt listing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipts {
    pub page: u32,
    pub size: u32,
    pub total_count: u32,
    #[serde(default)]
    pub records: Vec<ReceiptSummary>,
}

/// One row of the receipt listing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptSummary {
    pub id: String,
    pub date: String,
    pub total_amount: Amount,
    pub store_code: String,
    #[serde(default)]
    pub articles_count: u32,
    #[serde(default)]
    pub coupons_used_count: u32,
    #[serde(default)]
    pub has_returned_items: bool,
    #[serde(default)]
    pub returns_count: u32,
    #[serde(default)]
    pub returned_amount: i64,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub invoice_request_id: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub invoice_id: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub vendor: Option<String>,
    #[serde(default)]
    pub has_html_document: bool,
    #[serde(default)]
    pub is_html: bool,
}

/// A fully detailed receipt, as returned by the tickets endpoint.
///
/// Money fields keep the API's comma-decimal strings, so that writing a
/// receipt to the cache and reading it back gives the same receipt. Use
/// [`Receipt::bought_items`] for the exact decimal view.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub items_line: Vec<ReceiptItem>,
    pub date: String,
    pub total_amount: String,
    pub store_code: String,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptItem {
    pub current_unit_price: String,
    pub quantity: String,
    pub is_weight: bool,
    /// What would have been paid without discounts.
    pub original_amount: String,
    /// What was actually paid.
    pub extended_amount: String,
    pub description: String,
    #[serde(default)]
    pub tax_group: String,
    #[serde(default)]
    pub tax_group_name: String,
    #[serde(default)]
    pub code_input: String,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    pub discounts: Vec<Discount>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub deposit: Option<Deposit>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub gift_serial_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Deposit {
    pub quantity: i32,
    #[serde(default)]
    pub tax_group: String,
    #[serde(default)]
    pub tax_group_name: String,
    pub amount: String,
    pub description: String,
    pub unit_price: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Discount {
    pub description: String,
    pub amount: String,
}

impl Receipt {
    /// Reads a cached receipt from the JSON file at `path`.
    ///
    /// # Errors
    ///
    /// Returns any errors from reading or parsing the file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_slice(&data).with_context(|| format!("parsing {}", path.display()))
    }

    /// Flattens the receipt's line items into [`BoughtItem`]s, each carrying
    /// this receipt's store code and purchase time.
    ///
    /// # Errors
    ///
    /// Returns an error if the receipt date or any money field can't be
    /// parsed.
    pub fn bought_items(&self) -> Result<Vec<BoughtItem>> {
        let bought_time = parse_timestamp(&self.date)?;
        self.items_line
            .iter()
            .map(|item| BoughtItem::from_item(item, &self.store_code, bought_time))
            .collect()
    }
}

/// A normalized view of one purchased line, with exact decimal amounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoughtItem {
    pub unit_price: Amount,
    pub quantity: Decimal,
    pub is_weight: bool,
    /// `original_amount - extended_amount`.
    pub discount: Amount,
    /// The extended amount, i.e. what was paid.
    pub total: Amount,
    pub description: String,
    pub deposit: Option<BoughtDeposit>,
    pub store: String,
    pub bought_time: DateTime<FixedOffset>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoughtDeposit {
    pub quantity: i32,
    pub unit_price: Amount,
    pub amount: Amount,
    pub description: String,
}

impl BoughtItem {
    /// Builds a [`BoughtItem`] from a receipt line and the receipt's context.
    ///
    /// # Errors
    ///
    /// Returns an error naming the item if any of its amounts is malformed.
    pub fn from_item(
        item: &ReceiptItem,
        store_code: &str,
        bought_time: DateTime<FixedOffset>,
    ) -> Result<Self> {
        let parse = |field: &str, value: &str| {
            Amount::from_str(value).with_context(|| format!("{}: {field}", item.description))
        };
        let total = parse("extendedAmount", &item.extended_amount)?;
        let original = parse("originalAmount", &item.original_amount)?;
        let deposit = item
            .deposit
            .as_ref()
            .map(|d| -> Result<BoughtDeposit> {
                Ok(BoughtDeposit {
                    quantity: d.quantity,
                    unit_price: parse("deposit.unitPrice", &d.unit_price)?,
                    amount: parse("deposit.amount", &d.amount)?,
                    description: d.description.clone(),
                })
            })
            .transpose()?;
        Ok(Self {
            unit_price: parse("currentUnitPrice", &item.current_unit_price)?,
            quantity: parse_decimal(&item.quantity)
                .with_context(|| format!("{}: quantity", item.description))?,
            is_weight: item.is_weight,
            discount: original - total,
            total,
            description: item.description.clone(),
            deposit,
            store: store_code.to_string(),
            bought_time,
        })
    }
}

/// Parses a receipt timestamp.
///
/// Accepts RFC 3339 with an offset, or a naive ISO date-time or date, which
/// is taken to be UTC.
///
/// # Errors
///
/// Returns an error if `s` matches none of those forms.
pub fn parse_timestamp(s: &str) -> Result<DateTime<FixedOffset>> {
    if let Ok(time) = DateTime::parse_from_rfc3339(s) {
        return Ok(time);
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d").map(|d| d.and_time(NaiveTime::MIN)))
        .with_context(|| format!("invalid receipt date {s:?}"))?;
    Ok(naive.and_utc().fixed_offset())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OrEmpty<T> {
    Value(T),
    Text(String),
}

// Absent, null and "" all mean "no value".
fn empty_as_none<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    match Option::<OrEmpty<T>>::deserialize(deserializer)? {
        Some(OrEmpty::Value(value)) => Ok(Some(value)),
        Some(OrEmpty::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(OrEmpty::Text(text)) => Err(de::Error::custom(format!(
            "expected an object or an empty string, found {text:?}"
        ))),
        None => Ok(None),
    }
}

fn empty_string_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn item_json(deposit: Option<serde_json::Value>) -> serde_json::Value {
        let mut item = json!({
            "currentUnitPrice": "5,00",
            "quantity": "1",
            "isWeight": false,
            "originalAmount": "5,00",
            "extendedAmount": "4,50",
            "description": "Bread",
            "taxGroup": "1",
            "taxGroupName": "B",
            "codeInput": "20012345",
            "discounts": [{"description": "Rabatt", "amount": "0,50"}],
        });
        if let Some(deposit) = deposit {
            item["deposit"] = deposit;
        }
        item
    }

    fn bought(item: &ReceiptItem) -> BoughtItem {
        let time = parse_timestamp("2024-03-02T10:15:31+01:00").unwrap();
        BoughtItem::from_item(item, "DE2301", time).unwrap()
    }

    #[test]
    fn from_item_fn_computes_discount_and_total() {
        let item: ReceiptItem = serde_json::from_value(item_json(None)).unwrap();
        let bought = bought(&item);
        assert_eq!(bought.discount, Amount::from_str("0,50").unwrap());
        assert_eq!(bought.total, Amount::from_str("4,50").unwrap());
        assert_eq!(bought.unit_price.value(), Decimal::new(500, 2));
        assert_eq!(bought.store, "DE2301");
        assert_eq!(bought.description, "Bread");
    }

    #[test]
    fn from_item_fn_parses_fractional_weight_quantity() {
        let mut value = item_json(None);
        value["quantity"] = json!("0,754");
        value["isWeight"] = json!(true);
        let item: ReceiptItem = serde_json::from_value(value).unwrap();
        let bought = bought(&item);
        assert!(bought.is_weight);
        assert_eq!(bought.quantity, Decimal::new(754, 3));
    }

    #[test]
    fn from_item_fn_rejects_malformed_amount() {
        let mut value = item_json(None);
        value["extendedAmount"] = json!("four fifty");
        let item: ReceiptItem = serde_json::from_value(value).unwrap();
        let time = parse_timestamp("2024-03-02").unwrap();
        let err = BoughtItem::from_item(&item, "DE2301", time).unwrap_err();
        assert!(format!("{err:#}").contains("extendedAmount"));
    }

    #[test]
    fn deposit_absent_null_and_empty_string_all_mean_none() {
        for deposit in [None, Some(json!(null)), Some(json!("")), Some(json!("  "))] {
            let item: ReceiptItem = serde_json::from_value(item_json(deposit.clone())).unwrap();
            assert_eq!(item.deposit, None, "deposit {deposit:?}");
        }
    }

    #[test]
    fn deposit_with_unexpected_text_is_an_error() {
        let result = serde_json::from_value::<ReceiptItem>(item_json(Some(json!("yes"))));
        assert!(result.is_err());
    }

    #[test]
    fn deposit_object_is_normalized() {
        let deposit = json!({
            "quantity": 2,
            "taxGroup": "2",
            "taxGroupName": "A",
            "amount": "0,50",
            "description": "Pfand",
            "unitPrice": "0,25",
        });
        let item: ReceiptItem = serde_json::from_value(item_json(Some(deposit))).unwrap();
        let bought = bought(&item);
        assert_eq!(
            bought.deposit,
            Some(BoughtDeposit {
                quantity: 2,
                unit_price: Amount::from_str("0,25").unwrap(),
                amount: Amount::from_str("0,50").unwrap(),
                description: "Pfand".into(),
            })
        );
    }

    #[test]
    fn gift_serial_number_absent_null_and_empty_string_all_mean_none() {
        for serial in [None, Some(json!(null)), Some(json!(""))] {
            let mut value = item_json(None);
            if let Some(serial) = serial {
                value["giftSerialNumber"] = serial;
            }
            let item: ReceiptItem = serde_json::from_value(value).unwrap();
            assert_eq!(item.gift_serial_number, None);
        }
    }

    #[test]
    fn discounts_absent_or_null_mean_empty_list() {
        let mut value = item_json(None);
        value["discounts"] = json!(null);
        let item: ReceiptItem = serde_json::from_value(value.clone()).unwrap();
        assert!(item.discounts.is_empty());

        value.as_object_mut().unwrap().remove("discounts");
        let item: ReceiptItem = serde_json::from_value(value).unwrap();
        assert!(item.discounts.is_empty());
    }

    #[test]
    fn listing_page_parses_with_optional_metadata() {
        let data = fs::read("testdata/api/list_page.json").unwrap();
        let page: Receipts = serde_json::from_slice(&data).unwrap();
        assert_eq!(page.total_count, 2);
        assert_eq!(page.records.len(), 2);
        let first = &page.records[0];
        assert_eq!(first.id, "230100452024030201234");
        assert_eq!(first.total_amount, Amount::from_str("8,99").unwrap());
        assert_eq!(first.invoice_id, None);
        assert!(first.has_html_document);
        assert_eq!(page.records[1].vendor, None);
    }

    #[test]
    fn from_file_fn_reads_cached_receipt() {
        let receipt = Receipt::from_file("testdata/receipts/230100452024030201234.json").unwrap();
        assert_eq!(receipt.items_line.len(), 3);
        assert_eq!(receipt.store_code, "DE2301");
        let items = receipt.bought_items().unwrap();
        assert_eq!(items[2].discount, Amount::from_str("0,50").unwrap());
        assert_eq!(items[2].deposit, None);
    }

    #[test]
    fn from_file_fn_reports_corrupt_file() {
        let err = Receipt::from_file("testdata/corrupt/230100452024031100002.json").unwrap_err();
        assert!(format!("{err:#}").contains("parsing"));
    }

    #[test]
    fn receipt_survives_cache_round_trip() {
        let receipt = Receipt::from_file("testdata/receipts/230100452024030201234.json").unwrap();
        let cached = serde_json::to_vec(&receipt).unwrap();
        let reread: Receipt = serde_json::from_slice(&cached).unwrap();
        assert_eq!(reread, receipt);
        assert_eq!(serde_json::to_vec(&reread).unwrap(), cached);
    }

    #[test]
    fn parse_timestamp_fn_accepts_offset_and_naive_forms() {
        let with_offset = parse_timestamp("2024-03-02T10:15:31+01:00").unwrap();
        assert_eq!(with_offset.offset().local_minus_utc(), 3600);
        let naive = parse_timestamp("2024-03-09T18:02:11").unwrap();
        assert_eq!(naive.to_rfc3339(), "2024-03-09T18:02:11+00:00");
        let fractional = parse_timestamp("2024-03-09T18:02:11.250").unwrap();
        assert_eq!(fractional.timestamp_subsec_millis(), 250);
        assert!(parse_timestamp("yesterday").is_err());
    }
}
