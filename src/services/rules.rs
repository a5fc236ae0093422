//! Keyword and pattern profiles for the document classes the built-in
//! classifier recognizes.
//!
//! Patterns are matched case-insensitively and in multi-line mode, so `$`
//! matches at the end of every line. Where a pattern has a capture group, the
//! group is reported as the detected field value.

use crate::models::classification::DocumentClass;

/// Scoring profile for one document class.
#[derive(Debug)]
pub struct DocumentRules {
    pub class: DocumentClass,
    /// Phrases whose presence marks the document type. Worth 1.0 each.
    pub type_indicators: &'static [&'static str],
    /// Fields a complete document carries, each with alternative patterns.
    /// Worth 0.5 per matching pattern, and drive the confidence.
    pub required_fields: &'static [(&'static str, &'static [&'static str])],
    /// Additional tell-tale patterns. Worth 0.5 each.
    pub specific_patterns: &'static [&'static str],
}

pub const DRIVERS_LICENSE: DocumentRules = DocumentRules {
    class: DocumentClass::DriversLicense,
    type_indicators: &[
        "DRIVER LICENSE",
        "DRIVER'S LICENSE",
        "OPERATOR LICENSE",
        "COMMERCIAL DRIVER LICENSE",
        "IDENTIFICATION CARD",
        "DEPARTMENT OF MOTOR VEHICLES",
        "DMV",
    ],
    required_fields: &[
        (
            "license_number",
            &[
                r"DL\s*#?\s*[A-Z0-9]+",
                r"DRIVER'?S?\s*LIC(?:ENSE|)\s*#?\s*[A-Z0-9]+",
            ],
        ),
        ("name", &[r"NAME[\s:]+([A-Z ,]+)", r"([A-Z]+,[ \t]+[A-Z ]+)"]),
        (
            "dob",
            &[
                r"DOB[\s:]+\d{2}[-/]\d{2}[-/]\d{4}",
                r"DATE\s+OF\s+BIRTH[\s:]+\d{2}[-/]\d{2}[-/]\d{4}",
            ],
        ),
        (
            "expiration",
            &[
                r"EXP(?:IRES?)?[\s:]+\d{2}[-/]\d{2}[-/]\d{4}",
                r"EXPIRATION[\s:]+\d{2}[-/]\d{2}[-/]\d{4}",
            ],
        ),
        (
            "address",
            &[
                r"ADD?RESS[\s:]+[^\r\n]*",
                r"\d+\s+[A-Z0-9\s,]+(?:STREET|ST|AVENUE|AVE|ROAD|RD|DRIVE|DR)",
            ],
        ),
    ],
    specific_patterns: &[
        r"CLASS\s*[A-Z]",
        r"REST\w*:\s*[A-Z]",
        r"ENDORSEMENTS?",
        r"SEX\s*[MF]",
        r"HGT\s*\d",
        r"EYES?\s*[A-Z]{3}",
        r"HAIR\s*[A-Z]{3}",
    ],
};

pub const BANK_STATEMENT: DocumentRules = DocumentRules {
    class: DocumentClass::BankStatement,
    type_indicators: &[
        "BANK STATEMENT",
        "ACCOUNT STATEMENT",
        "MONTHLY STATEMENT",
        "ACCOUNT SUMMARY",
        "ACCOUNT ACTIVITY",
        "TRANSACTION HISTORY",
    ],
    required_fields: &[
        (
            "bank_name",
            &[
                r"(BANK\s+OF\s+[A-Z]+|[A-Z]+\s+BANK|CHASE|WELLS\s+FARGO|CITIBANK)",
                r"([A-Z]+\s+)?BANK(?:ING)?\s+STATEMENT",
            ],
        ),
        (
            "account_number",
            &[
                r"ACCOUNT\s*(?:#|NUMBER|NO)[\s:]*[X*\d]+",
                r"ACCT\s*(?:#|NUMBER|NO)[\s:]*[X*\d]+",
            ],
        ),
        (
            "statement_period",
            &[
                r"STATEMENT\s+PERIOD[\s:]+[^\r\n]*",
                r"STATEMENT\s+DATE[\s:]+[^\r\n]*",
            ],
        ),
        (
            "balance",
            &[
                r"(?:ENDING|CLOSING)\s+BALANCE[\s:]+[$][\d,.]+",
                r"BALANCE[\s:]+[$][\d,.]+",
            ],
        ),
        (
            "transactions",
            &[
                r"\d{2}[-/]\d{2}\s+(?:\$[\d,.]+\s+){2}",
                r"(?:DEPOSIT|WITHDRAWAL|DEBIT|CREDIT)\s+\$[\d,.]+",
            ],
        ),
    ],
    specific_patterns: &[
        r"DEPOSIT\s+SUMMARY",
        r"WITHDRAWAL\s+SUMMARY",
        r"BEGINNING\s+BALANCE",
        r"ENDING\s+BALANCE",
        r"APR\s*\d",
        r"INTEREST\s+RATE",
        r"AVAILABLE\s+BALANCE",
    ],
};

pub const INVOICE: DocumentRules = DocumentRules {
    class: DocumentClass::Invoice,
    type_indicators: &[
        "INVOICE",
        "TAX INVOICE",
        "BILL OF SALE",
        "PURCHASE INVOICE",
        "BILLING STATEMENT",
        "PAYMENT DUE",
    ],
    required_fields: &[
        (
            "invoice_number",
            &[
                r"INVOICE\s*(?:#|NUMBER|NO)[\s:]*\d+",
                r"INV\s*(?:#|NUMBER|NO)[\s:]*\d+",
            ],
        ),
        (
            "date",
            &[
                r"(?:INVOICE\s+)?DATE[\s:]+\d{2}[-/]\d{2}[-/]\d{4}",
                r"DATED?[\s:]+\d{2}[-/]\d{2}[-/]\d{4}",
            ],
        ),
        (
            "amount",
            &[r"TOTAL[\s:]+\$[\d,.]+", r"AMOUNT\s+DUE[\s:]+\$[\d,.]+"],
        ),
        (
            "vendor",
            &[r"FROM[\s:]+([A-Z ]+)$", r"VENDOR[\s:]+([A-Z ]+)$"],
        ),
        (
            "items",
            &[
                r"\d+\s+[A-Z0-9\s]+\$[\d,.]+",
                r"DESCRIPTION.*?(?:AMOUNT|PRICE|TOTAL)",
            ],
        ),
    ],
    specific_patterns: &[
        r"SUBTOTAL",
        r"SHIPPING\s+(?:COST|FEE)",
        r"TAX\s+RATE",
        r"PO\s*(?:NUMBER|#)",
        r"ITEM\s+DESCRIPTION",
        r"PAYMENT\s+TERMS",
        r"DUE\s+DATE",
    ],
};

/// Profiles in tie-break order: on equal scores the earlier class wins.
pub const ALL: &[DocumentRules] = &[DRIVERS_LICENSE, BANK_STATEMENT, INVOICE];
