//! JSON wire format for [`VoucherRecord`] messages.

use crate::{Result, VoucherRecord};
use bytes::Bytes;

/// Encodes a record into a message payload.
pub fn encode(record: &VoucherRecord) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(record)?))
}

/// Decodes a message payload into a record.
pub fn decode(payload: &[u8]) -> Result<VoucherRecord> {
    Ok(serde_json::from_slice(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VoucherStatus;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn record() -> VoucherRecord {
        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        VoucherRecord {
            voucher_number: "DV0000000042".to_string(),
            voucher_date: date,
            amount: Decimal::new(123_456, 2),
            description: "Rent payment".to_string(),
            created_by: "SYSTEM".to_string(),
            created_date: date,
            status: VoucherStatus::PendingApproval,
            debit_account: "1003".to_string(),
            credit_account: "2007".to_string(),
        }
    }

    #[test]
    fn uses_stable_field_names() {
        let bytes = encode(&record()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["voucherNumber"], "DV0000000042");
        assert_eq!(value["voucherDate"], "2024-03-15");
        assert_eq!(value["amount"], "1234.56");
        assert_eq!(value["createdBy"], "SYSTEM");
        assert_eq!(value["createdDate"], "2024-03-15");
        assert_eq!(value["status"], "PENDING_APPROVAL");
        assert_eq!(value["debitAccount"], "1003");
        assert_eq!(value["creditAccount"], "2007");
    }

    #[test]
    fn decodes_message_from_another_producer() {
        let payload = br#"{
            "voucherNumber": "DV0000000001",
            "voucherDate": "2024-01-02",
            "amount": "10.50",
            "description": "Utility bill",
            "createdBy": "alice",
            "createdDate": "2024-01-02",
            "status": "DRAFT",
            "debitAccount": "1001",
            "creditAccount": "2001"
        }"#;

        let decoded = decode(payload).unwrap();
        assert_eq!(decoded.voucher_number, "DV0000000001");
        assert_eq!(decoded.amount, Decimal::new(1050, 2));
        assert_eq!(decoded.status, VoucherStatus::Draft);
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            decode(b"not json"),
            Err(crate::Error::Codec { .. })
        ));
    }
}
