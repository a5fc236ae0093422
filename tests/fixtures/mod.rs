//! Sample documents for pipeline and end-to-end tests
#![allow(dead_code)]

pub const INVOICE_TEXT: &str = "ACME SUPPLIES\n\
    TAX INVOICE\n\
    Invoice # 10442\n\
    Invoice Date: 03/14/2024\n\
    From: ACME SUPPLIES\n\
    Item Description          Qty   Price\n\
    2 WIDGETS $40.00\n\
    Subtotal $40.00\n\
    Total: $43.20\n\
    Payment Terms: Net 30\n";

pub const STATEMENT_TEXT: &str = "FIRST NATIONAL BANK\n\
    Monthly Statement\n\
    Account Number: XXXX1234\n\
    Statement Period: 01/01/2024 - 01/31/2024\n\
    Beginning Balance $1,200.00\n\
    Deposit $500.00\n\
    Ending Balance: $1,700.00\n";

pub const LICENSE_TEXT: &str = "DEPARTMENT OF MOTOR VEHICLES\n\
    DRIVER LICENSE\n\
    DL # D1234567\n\
    NAME: DOE, JANE\n\
    DOB: 01/02/1990\n\
    EXP: 01/02/2030\n\
    ADDRESS: 12 MAIN STREET\n\
    SEX F HGT 5-06 EYES BRN\n";

/// An invoice padded with line items to at least `size` bytes.
pub fn invoice_of_size(size: usize) -> Vec<u8> {
    let mut doc = INVOICE_TEXT.to_string();
    let mut line = 1;
    while doc.len() < size {
        doc.push_str(&format!("{line} SPARE PARTS $12.50\n"));
        line += 1;
    }
    doc.into_bytes()
}

/// Labelled samples: document text and the class it should receive.
pub const LABELLED_SAMPLES: &[(&str, &str)] = &[
    (INVOICE_TEXT, "invoice"),
    (STATEMENT_TEXT, "bank_statement"),
    (LICENSE_TEXT, "drivers_license"),
    ("lorem ipsum dolor sit amet", "unknown"),
];
