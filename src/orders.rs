use std::collections::HashMap;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

lazy_static! {
    static ref PUNCTUATION: Regex = Regex::new(r"[^\w\s\-]").unwrap();
    // one grosz; order totals and payment amounts may disagree by rounding
    static ref BALANCE_TOLERANCE: BigDecimal = BigDecimal::new(1.into(), 2);
}

#[derive(Debug, Error)]
pub enum OrderParseError {
    #[error("malformed marketplace response")]
    Json(#[from] serde_json::Error),
    #[error("invalid amount in marketplace response: {0}")]
    Amount(String),
    #[error("invalid order date: {0}")]
    Date(String),
}

// ---------------------------------------------------------------------------
// Raw response shape
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct OrdersDocument {
    #[serde(rename = "orderGroups")]
    order_groups: Vec<OrderGroup>,
}

#[derive(Debug, Deserialize)]
struct OrderGroup {
    #[serde(rename = "groupId")]
    group_id: String,
    myorders: Vec<RawOrder>,
}

#[derive(Debug, Deserialize)]
struct RawOrder {
    seller: RawSeller,
    offers: Vec<RawOffer>,
    #[serde(rename = "orderDate")]
    order_date: String,
    #[serde(rename = "totalCost")]
    total_cost: RawMoney,
    payment: RawPayment,
}

#[derive(Debug, Deserialize)]
struct RawSeller {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RawMoney {
    amount: String,
    currency: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawOffer {
    id: String,
    title: String,
    #[serde(rename = "unitPrice")]
    unit_price: RawMoney,
    #[serde(rename = "friendlyUrl", default)]
    friendly_url: String,
    quantity: u32,
    #[serde(rename = "imageUrl", default)]
    image_url: String,
}

#[derive(Debug, Deserialize)]
struct RawPayment {
    id: String,
    amount: RawMoney,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    method: Option<String>,
}

fn parse_money(raw: &RawMoney) -> Result<BigDecimal, OrderParseError> {
    BigDecimal::from_str(&raw.amount).map_err(|_| OrderParseError::Amount(raw.amount.clone()))
}

fn parse_order_date(s: &str) -> Result<NaiveDate, OrderParseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.date_naive());
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|dt| dt.date())
        .map_err(|_| OrderParseError::Date(s.to_owned()))
}

// ---------------------------------------------------------------------------
// Domain shape
// ---------------------------------------------------------------------------

/// Return a short, deterministic hash of `id`, stable across fetches so a
/// payment can be re-addressed between preview and apply.
pub fn short_id(id: &str) -> String {
    Sha256::digest(id.as_bytes())
        .iter()
        .take(4)
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Offer {
    pub offer_id: String,
    pub title: String,
    pub unit_price: BigDecimal,
    pub price_currency: String,
    pub friendly_url: String,
    pub quantity: u32,
    pub image_url: String,
}

impl Offer {
    /// Shortened title suitable for notes: punctuation stripped, at most
    /// three words within 32 characters, words capitalized unless trivially
    /// short.
    pub fn simplified_title(&self) -> String {
        fn format_word(word: &str) -> String {
            word.split('-')
                .map(|part| {
                    if part.chars().count() > 2 {
                        let mut chars = part.chars();
                        match chars.next() {
                            Some(first) => {
                                first.to_uppercase().collect::<String>()
                                    + &chars.as_str().to_lowercase()
                            }
                            None => String::new(),
                        }
                    } else {
                        part.to_lowercase()
                    }
                })
                .collect::<Vec<_>>()
                .join("-")
        }

        let clean = PUNCTUATION.replace_all(&self.title, "");

        let mut result: Vec<String> = Vec::new();
        let mut total_length = 0usize;
        for word in clean.split_whitespace() {
            let formatted = format_word(word);
            let extra = formatted.chars().count() + usize::from(!result.is_empty());
            if result.len() < 3 && total_length + extra <= 32 {
                total_length += extra;
                result.push(formatted);
            } else {
                break;
            }
        }

        result.join(" ")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub order_id: String,
    pub seller: String,
    pub offers: Vec<Offer>,
    pub order_date: NaiveDate,
    pub total_cost: BigDecimal,
    pub payment_amount: BigDecimal,
    pub payment_id: String,
    pub payment_provider: Option<String>,
    pub payment_method: Option<String>,
}

impl Order {
    /// Human readable lines for the ordered offers.
    pub fn offer_lines(&self) -> Vec<String> {
        self.offers
            .iter()
            .map(|offer| {
                format!(
                    "{} ({} {})",
                    offer.simplified_title(),
                    offer.unit_price,
                    offer.price_currency
                )
            })
            .collect()
    }
}

/// Group of orders paid together under one payment id.
#[derive(Debug, Clone, PartialEq)]
pub struct Payment {
    pub payment_id: String,
    pub orders: Vec<Order>,
}

impl Payment {
    pub fn amount(&self) -> BigDecimal {
        self.orders
            .first()
            .map(|order| order.payment_amount.clone())
            .unwrap_or_default()
    }

    pub fn date(&self) -> NaiveDate {
        self.orders
            .first()
            .map(|order| order.order_date)
            .unwrap_or_default()
    }

    pub fn sum_total_cost(&self) -> BigDecimal {
        self.orders
            .iter()
            .map(|order| order.total_cost.clone())
            .sum()
    }

    /// Whether the grouped order total reconciles with the paid amount.
    pub fn is_balanced(&self) -> bool {
        (self.amount() - self.sum_total_cost()).abs() <= *BALANCE_TOLERANCE
    }

    pub fn short_id(&self) -> String {
        short_id(&self.payment_id)
    }

    pub fn summary(&self) -> String {
        let provider = self
            .orders
            .first()
            .and_then(|order| order.payment_provider.as_deref())
            .unwrap_or("unknown");
        format!(
            "payment {}: {} orders via {}, {} total, balanced: {}",
            self.short_id(),
            self.orders.len(),
            provider,
            self.amount(),
            self.is_balanced()
        )
    }
}

/// Flatten the order-group document into orders, one per group entry.
pub fn parse_orders(value: serde_json::Value) -> Result<Vec<Order>, OrderParseError> {
    let document: OrdersDocument = serde_json::from_value(value)?;

    let mut orders = Vec::new();
    for group in document.order_groups {
        for raw in group.myorders {
            let offers = raw
                .offers
                .iter()
                .map(|o| {
                    Ok(Offer {
                        offer_id: o.id.clone(),
                        title: o.title.clone(),
                        unit_price: parse_money(&o.unit_price)?,
                        price_currency: o.unit_price.currency.clone().unwrap_or_default(),
                        friendly_url: o.friendly_url.clone(),
                        quantity: o.quantity,
                        image_url: o.image_url.clone(),
                    })
                })
                .collect::<Result<Vec<_>, OrderParseError>>()?;

            orders.push(Order {
                order_id: group.group_id.clone(),
                seller: raw.seller.login,
                offers,
                order_date: parse_order_date(&raw.order_date)?,
                total_cost: parse_money(&raw.total_cost)?,
                payment_amount: parse_money(&raw.payment.amount)?,
                payment_id: raw.payment.id,
                payment_provider: raw.payment.provider,
                payment_method: raw.payment.method,
            });
        }
    }

    Ok(orders)
}

/// Group orders by their shared payment id, preserving first-seen order.
pub fn group_payments(orders: Vec<Order>) -> Vec<Payment> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut payments: Vec<Payment> = Vec::new();

    for order in orders {
        match index.get(&order.payment_id) {
            Some(&i) => payments[i].orders.push(order),
            None => {
                index.insert(order.payment_id.clone(), payments.len());
                payments.push(Payment {
                    payment_id: order.payment_id.clone(),
                    orders: vec![order],
                });
            }
        }
    }

    payments
}

/// Parse a raw order-group document straight into grouped payments.
pub fn parse_payments(value: serde_json::Value) -> Result<Vec<Payment>, OrderParseError> {
    Ok(group_payments(parse_orders(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use serde_json::json;

    fn offer(title: &str) -> Offer {
        Offer {
            offer_id: "o1".into(),
            title: title.into(),
            unit_price: BigDecimal::from_str("12.34").unwrap(),
            price_currency: "PLN".into(),
            friendly_url: String::new(),
            quantity: 1,
            image_url: String::new(),
        }
    }

    fn order(payment_id: &str, total: &str, paid: &str) -> Order {
        Order {
            order_id: "g1".into(),
            seller: "seller1".into(),
            offers: vec![offer("Czerwony Kubek Ceramiczny 300ml!")],
            order_date: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
            total_cost: BigDecimal::from_str(total).unwrap(),
            payment_amount: BigDecimal::from_str(paid).unwrap(),
            payment_id: payment_id.into(),
            payment_provider: Some("P24".into()),
            payment_method: None,
        }
    }

    #[test]
    fn test_short_id_is_deterministic() {
        assert_eq!(short_id("payment-1"), short_id("payment-1"));
        assert_ne!(short_id("payment-1"), short_id("payment-2"));
        assert_eq!(short_id("payment-1").len(), 8);
    }

    #[test]
    fn test_simplified_title_caps_words() {
        let o = offer("czerwony kubek ceramiczny 300ml dodatkowe słowa");
        assert_eq!(o.simplified_title(), "Czerwony Kubek Ceramiczny");
    }

    #[test]
    fn test_simplified_title_strips_punctuation_and_keeps_short_words_lower() {
        let o = offer("Zestaw!!! do kawy (premium)");
        assert_eq!(o.simplified_title(), "Zestaw do Kawy");
    }

    #[test]
    fn test_simplified_title_respects_length_limit() {
        let o = offer("Bardzoooooooooodługasłowiańska nazwa produktu");
        let title = o.simplified_title();
        assert!(title.chars().count() <= 32);
    }

    #[test]
    fn test_group_payments_by_payment_id() {
        let orders = vec![
            order("pay-a", "10.00", "24.68"),
            order("pay-b", "5.00", "5.00"),
            order("pay-a", "14.68", "24.68"),
        ];

        let payments = group_payments(orders);

        assert_eq!(payments.len(), 2);
        assert_eq!(payments[0].payment_id, "pay-a");
        assert_eq!(payments[0].orders.len(), 2);
        assert_eq!(payments[1].payment_id, "pay-b");
    }

    #[test]
    fn test_is_balanced_within_tolerance() {
        let balanced = Payment {
            payment_id: "pay-a".into(),
            orders: vec![
                order("pay-a", "10.00", "24.68"),
                order("pay-a", "14.68", "24.68"),
            ],
        };
        assert_eq!(balanced.sum_total_cost(), BigDecimal::from_str("24.68").unwrap());
        assert!(balanced.is_balanced());

        let unbalanced = Payment {
            payment_id: "pay-b".into(),
            orders: vec![
                order("pay-b", "10.00", "24.00"),
                order("pay-b", "14.68", "24.00"),
            ],
        };
        assert!(!unbalanced.is_balanced());
    }

    #[test]
    fn test_parse_payments_from_document() -> Result<()> {
        let document = json!({
            "orderGroups": [
                {
                    "groupId": "g-1",
                    "myorders": [
                        {
                            "seller": {"login": "seller1"},
                            "offers": [
                                {
                                    "id": "o-1",
                                    "title": "Kubek ceramiczny",
                                    "unitPrice": {"amount": "24.68", "currency": "PLN"},
                                    "friendlyUrl": "https://example.invalid/o-1",
                                    "quantity": 1,
                                    "imageUrl": ""
                                }
                            ],
                            "orderDate": "2025-01-10T08:30:00Z",
                            "totalCost": {"amount": "24.68", "currency": "PLN"},
                            "payment": {
                                "id": "pay-1",
                                "amount": {"amount": "24.68", "currency": "PLN"},
                                "provider": "P24",
                                "method": "blik"
                            }
                        }
                    ]
                }
            ]
        });

        let payments = parse_payments(document)?;

        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].amount(), BigDecimal::from_str("24.68")?);
        assert_eq!(
            payments[0].date(),
            NaiveDate::from_ymd_opt(2025, 1, 10).unwrap()
        );
        assert!(payments[0].is_balanced());
        assert_eq!(payments[0].orders[0].payment_provider.as_deref(), Some("P24"));
        Ok(())
    }

    #[test]
    fn test_parse_orders_rejects_bad_amount() {
        let document = json!({
            "orderGroups": [
                {
                    "groupId": "g-1",
                    "myorders": [
                        {
                            "seller": {"login": "seller1"},
                            "offers": [],
                            "orderDate": "2025-01-10T08:30:00Z",
                            "totalCost": {"amount": "not-a-number", "currency": "PLN"},
                            "payment": {"id": "pay-1", "amount": {"amount": "1.00", "currency": "PLN"}}
                        }
                    ]
                }
            ]
        });

        assert!(matches!(
            parse_orders(document),
            Err(OrderParseError::Amount(_))
        ));
    }

    #[test]
    fn test_payment_summary_mentions_provider() {
        let payment = Payment {
            payment_id: "pay-a".into(),
            orders: vec![order("pay-a", "24.68", "24.68")],
        };
        let summary = payment.summary();
        assert!(summary.contains("P24"));
        assert!(summary.contains("balanced: true"));
    }
}
