use crate::error::{IntakeError, Result};
use crate::schema::DocumentType;
use log::debug;

pub const EVENT_INFO_SHEET: &str = "INFO_EVENTO";
pub const EVENT_SALES_SHEET: &str = "VENTAS";
pub const EVENT_EXPENSES_SHEET: &str = "GASTOS";

pub const SUBSCRIBERS_SHEET: &str = "SUSCRIPTORES";
pub const PAYMENTS_SHEET: &str = "PAGOS_MENSUALIDAD";
pub const UNLOCKS_SHEET: &str = "DESBLOQUEOS";
pub const INVENTORY_SHEET: &str = "VENTA_INVENTARIO";

pub const CAMPAIGN_INFO_SHEET: &str = "INFO_CAMPAÑA";
pub const LEADS_SHEET: &str = "LEADS";
pub const ONLINE_SALES_SHEET: &str = "VENTAS_ONLINE";

/// Sheet pairs that identify each template, checked in order.
const SIGNATURES: [(DocumentType, &str, &str); 3] = [
    (DocumentType::Event, EVENT_INFO_SHEET, EVENT_SALES_SHEET),
    (DocumentType::SubscriptionBatch, SUBSCRIBERS_SHEET, PAYMENTS_SHEET),
    (DocumentType::Campaign, CAMPAIGN_INFO_SHEET, LEADS_SHEET),
];

/// Decides which template a workbook follows from its sheet names alone.
/// Matching is exact and case-sensitive; the first complete pair wins.
pub fn classify<S: AsRef<str>>(sheet_names: &[S]) -> Result<DocumentType> {
    let has = |wanted: &str| sheet_names.iter().any(|name| name.as_ref() == wanted);

    for (document_type, first, second) in SIGNATURES {
        if has(first) && has(second) {
            debug!("Workbook classified as {:?}", document_type);
            return Ok(document_type);
        }
    }

    Err(IntakeError::UnrecognizedFormat {
        sheets: sheet_names.iter().map(|s| s.as_ref().to_string()).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recognizes_each_template() {
        assert_eq!(
            classify(&["INFO_EVENTO", "VENTAS", "GASTOS"]).unwrap(),
            DocumentType::Event
        );
        assert_eq!(
            classify(&["SUSCRIPTORES", "PAGOS_MENSUALIDAD"]).unwrap(),
            DocumentType::SubscriptionBatch
        );
        assert_eq!(
            classify(&["LEADS", "VENTAS_ONLINE", "INFO_CAMPAÑA"]).unwrap(),
            DocumentType::Campaign
        );
    }

    #[test]
    fn test_incomplete_pairs_are_unrecognized() {
        let cases: [&[&str]; 6] = [
            &["INFO_EVENTO"],
            &["VENTAS", "GASTOS"],
            &["SUSCRIPTORES"],
            &["PAGOS_MENSUALIDAD", "DESBLOQUEOS"],
            &["INFO_CAMPAÑA", "VENTAS_ONLINE"],
            &[],
        ];
        for sheets in cases {
            let result = classify(sheets);
            assert!(
                matches!(result, Err(IntakeError::UnrecognizedFormat { .. })),
                "{:?} should not be recognized",
                sheets
            );
        }
    }

    #[test]
    fn test_matching_is_exact_and_case_sensitive() {
        assert!(classify(&["info_evento", "ventas"]).is_err());
        assert!(classify(&["INFO_EVENTO ", "VENTAS"]).is_err());
        assert!(classify(&["INFO_CAMPANA", "LEADS"]).is_err());
    }

    #[test]
    fn test_first_signature_wins_when_several_match() {
        let sheets = ["INFO_CAMPAÑA", "LEADS", "INFO_EVENTO", "VENTAS"];
        assert_eq!(classify(&sheets).unwrap(), DocumentType::Event);
    }

    #[test]
    fn test_error_message_points_to_templates() {
        let err = classify(&["Hoja1"]).unwrap_err();
        assert!(err.to_string().contains("plantillas oficiales"));
    }
}
