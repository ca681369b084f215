use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::tenant::{CompanyId, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(pub String);

/// Business documents that can be routed through the approval matrix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    PurchaseRequisition,
    PurchaseOrder,
    VendorBill,
    VendorPayment,
    SalesOrder,
    SalesInvoice,
    SalesDiscount,
    CreditNote,
    DebitNote,
    StockAdjustment,
    WorkOrder,
}

impl DocumentType {
    pub const ALL: [DocumentType; 11] = [
        Self::PurchaseRequisition,
        Self::PurchaseOrder,
        Self::VendorBill,
        Self::VendorPayment,
        Self::SalesOrder,
        Self::SalesInvoice,
        Self::SalesDiscount,
        Self::CreditNote,
        Self::DebitNote,
        Self::StockAdjustment,
        Self::WorkOrder,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PurchaseRequisition => "purchase_requisition",
            Self::PurchaseOrder => "purchase_order",
            Self::VendorBill => "vendor_bill",
            Self::VendorPayment => "vendor_payment",
            Self::SalesOrder => "sales_order",
            Self::SalesInvoice => "sales_invoice",
            Self::SalesDiscount => "sales_discount",
            Self::CreditNote => "credit_note",
            Self::DebitNote => "debit_note",
            Self::StockAdjustment => "stock_adjustment",
            Self::WorkOrder => "work_order",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let key = value.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|candidate| candidate.as_str() == key)
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a document adapter hands the engine when a document enters approval.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSubmission {
    pub company_id: CompanyId,
    pub document_type: DocumentType,
    pub document_id: DocumentId,
    pub document_number: String,
    pub amount: Decimal,
    pub requested_by: UserId,
}
