use std::io::Read;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use csv::ReaderBuilder;
use thiserror::Error;
use tracing::debug;

use crate::bank::BankRecord;

// Header row of the bank export, Polish locale.
const COL_DATE: &str = "Data transakcji";
const COL_AMOUNT: &str = "Kwota w walucie rachunku";
const COL_OPERATION_AMOUNT: &str = "Kwota operacji";
const COL_SENDER: &str = "Nazwa nadawcy";
const COL_RECIPIENT: &str = "Nazwa odbiorcy";
const COL_DETAILS: &str = "Szczegóły transakcji";
const COL_OPERATION_CURRENCY: &str = "Waluta operacji";
const COL_ACCOUNT_CURRENCY: &str = "Waluta rachunku";
const COL_SENDER_ACCOUNT: &str = "Numer rachunku nadawcy";
const COL_RECIPIENT_ACCOUNT: &str = "Numer rachunku odbiorcy";

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read csv input")]
    Io(#[from] std::io::Error),
    #[error("malformed csv row")]
    Csv(#[from] csv::Error),
    #[error("missing column: {0}")]
    MissingColumn(&'static str),
    #[error("invalid date format: {0}")]
    InvalidDate(String),
    #[error("invalid amount format: {0}")]
    InvalidAmount(String),
}

/// Parse a `DD-MM-YYYY` date.
pub fn parse_pl_date(s: &str) -> Result<NaiveDate, ParseError> {
    NaiveDate::parse_from_str(s.trim(), "%d-%m-%Y")
        .map_err(|_| ParseError::InvalidDate(s.trim().to_owned()))
}

/// Parse a monetary amount with a comma decimal separator and optional
/// space thousands separators. Decimal all the way down, never floats.
pub fn parse_amount(s: &str) -> Result<BigDecimal, ParseError> {
    let cleaned: String = s
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    BigDecimal::from_str(&cleaned).map_err(|_| ParseError::InvalidAmount(s.trim().to_owned()))
}

/// Read bank records from a semicolon-delimited export. The first line is a
/// preamble the bank prepends before the actual header row.
pub fn read_bank_records<R: Read>(mut input: R) -> Result<Vec<BankRecord>, ParseError> {
    let mut content = String::new();
    input.read_to_string(&mut content)?;

    let body = match content.find('\n') {
        Some(i) => &content[i + 1..],
        None => "",
    };

    let mut reader = ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .from_reader(body.as_bytes());

    let headers = reader.headers()?.clone();
    let column = |name: &'static str| -> Result<usize, ParseError> {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or(ParseError::MissingColumn(name))
    };

    let c_date = column(COL_DATE)?;
    let c_amount = column(COL_AMOUNT)?;
    let c_operation_amount = column(COL_OPERATION_AMOUNT)?;
    let c_sender = column(COL_SENDER)?;
    let c_recipient = column(COL_RECIPIENT)?;
    let c_details = column(COL_DETAILS)?;
    let c_operation_currency = column(COL_OPERATION_CURRENCY)?;
    let c_account_currency = column(COL_ACCOUNT_CURRENCY)?;
    let c_sender_account = column(COL_SENDER_ACCOUNT)?;
    let c_recipient_account = column(COL_RECIPIENT_ACCOUNT)?;

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let field = |i: usize| row.get(i).unwrap_or("").to_owned();

        records.push(BankRecord {
            date: parse_pl_date(&field(c_date))?,
            amount: parse_amount(&field(c_amount))?,
            operation_amount: parse_amount(&field(c_operation_amount))?,
            sender: field(c_sender),
            recipient: field(c_recipient),
            details: field(c_details),
            operation_currency: field(c_operation_currency),
            account_currency: field(c_account_currency),
            sender_account: field(c_sender_account),
            recipient_account: field(c_recipient_account),
        });
    }

    debug!("parsed {} bank records", records.len());

    Ok(records)
}
