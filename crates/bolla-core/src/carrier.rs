//! Carrier label-service collaborator
//!
//! The pipeline submits batches and consumes per-record outcomes; it never
//! builds the wire protocol itself. [`CarrierClient`] is the seam,
//! [`HttpCarrierClient`] the adapter for the carrier's XML-over-HTTP label
//! service: batch submission, day-close confirmation, and the status query
//! used by ledger reconciliation.

use crate::config::CarrierConfig;
use crate::model::{ShipmentRecord, MAX_BATCH_SIZE};
use async_trait::async_trait;
use quick_xml::events::{BytesText, Event};
use quick_xml::{Reader, Writer};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Per-record outcome from a batch submission, in batch order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordOutcome {
    /// Customer reference ("Bda") echoing the submitted record.
    pub reference: String,
    /// Carrier-assigned shipment number, present on acceptance.
    pub shipment_number: Option<String>,
    pub accepted: bool,
    /// Carrier's message for rejected records.
    pub message: Option<String>,
}

/// A shipment as the carrier reports it in status queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteShipment {
    pub shipment_number: String,
    pub reference: String,
    pub state: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CarrierError {
    #[error("carrier transport error: {0}")]
    Transport(String),

    #[error("carrier request timed out")]
    Timeout,

    #[error("carrier response unparseable: {0}")]
    Protocol(String),

    /// The carrier understood the request and said no. Terminal.
    #[error("carrier rejected the request: {0}")]
    Rejected(String),
}

impl CarrierError {
    /// True for failures worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        !matches!(self, CarrierError::Rejected(_))
    }
}

/// The carrier seam. Implementations must return one outcome per submitted
/// record, in submission order.
#[async_trait]
pub trait CarrierClient: Send + Sync {
    /// Submit one batch (at most [`MAX_BATCH_SIZE`] records).
    async fn submit(&self, records: &[ShipmentRecord]) -> Result<Vec<RecordOutcome>, CarrierError>;

    /// Confirm all open shipments for the site ("close work day"). Distinct,
    /// explicit step after all batches of a run have been submitted.
    async fn confirm_open_shipments(&self) -> Result<(), CarrierError>;

    /// Look a shipment up by customer reference. `None` means the carrier
    /// never received it.
    async fn query_status(&self, reference: &str) -> Result<Option<RemoteShipment>, CarrierError>;
}

// ============================================================================
// HTTP adapter
// ============================================================================

pub struct HttpCarrierClient {
    client: reqwest::Client,
    config: CarrierConfig,
}

impl HttpCarrierClient {
    pub fn new(config: CarrierConfig) -> Result<Self, CarrierError> {
        if !config.credentials_complete() {
            return Err(CarrierError::Rejected("incomplete carrier credentials".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CarrierError::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Cheap credential check: an empty status query must succeed.
    pub async fn test_connection(&self) -> bool {
        self.query_status("").await.is_ok()
    }

    async fn post_xml(&self, operation: &str, body: String) -> Result<String, CarrierError> {
        let url = format!("{}/{}", self.config.endpoint.trim_end_matches('/'), operation);
        debug!(%url, bytes = body.len(), "carrier request");

        let response = self
            .client
            .post(&url)
            .header("content-type", "text/xml; charset=utf-8")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CarrierError::Timeout
                } else {
                    CarrierError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(CarrierError::Transport(format!("server returned {}", status)));
        }
        if !status.is_success() {
            return Err(CarrierError::Rejected(format!("carrier returned {}", status)));
        }

        response
            .text()
            .await
            .map_err(|e| CarrierError::Transport(e.to_string()))
    }

    fn build_submit_payload(&self, records: &[ShipmentRecord]) -> Result<String, CarrierError> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        writer
            .create_element("Info")
            .write_inner_content(|w| {
                write_field(w, "SedeGls", &self.config.site)?;
                write_field(w, "CodiceClienteGls", &self.config.client_code)?;
                write_field(w, "PasswordClienteGls", &self.config.password)?;
                write_field(w, "CodiceContrattoGls", &self.config.contract_code)?;
                write_field(w, "GeneraPdf", if self.config.generate_pdf { "1" } else { "0" })?;
                for record in records {
                    w.create_element("Parcel").write_inner_content(|w| {
                        write_record_fields(w, record)
                    })?;
                }
                Ok(())
            })
            .map_err(|e: std::io::Error| CarrierError::Protocol(e.to_string()))?;

        String::from_utf8(writer.into_inner().into_inner())
            .map_err(|e| CarrierError::Protocol(e.to_string()))
    }

    fn build_credentials_payload(&self, root: &str) -> Result<String, CarrierError> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        writer
            .create_element(root)
            .write_inner_content(|w| {
                write_field(w, "SedeGls", &self.config.site)?;
                write_field(w, "CodiceClienteGls", &self.config.client_code)?;
                write_field(w, "PasswordClienteGls", &self.config.password)?;
                Ok(())
            })
            .map_err(|e: std::io::Error| CarrierError::Protocol(e.to_string()))?;

        String::from_utf8(writer.into_inner().into_inner())
            .map_err(|e| CarrierError::Protocol(e.to_string()))
    }
}

fn write_field<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    value: &str,
) -> std::io::Result<()> {
    // The carrier treats absent and empty elements the same; skip empties.
    if value.is_empty() {
        return Ok(());
    }
    writer
        .create_element(name)
        .write_text_content(BytesText::new(value))?;
    Ok(())
}

fn write_record_fields<W: std::io::Write>(
    writer: &mut Writer<W>,
    record: &ShipmentRecord,
) -> std::io::Result<()> {
    write_field(writer, "RagioneSociale", &record.recipient)?;
    write_field(writer, "Indirizzo", &record.street)?;
    write_field(writer, "Localita", &record.locality)?;
    write_field(writer, "Zipcode", &record.postal_code)?;
    write_field(writer, "Provincia", &record.province)?;
    write_field(writer, "Colli", &record.packages.to_string())?;
    write_field(writer, "PesoReale", &format!("{:.2}", record.weight_kg))?;
    write_field(writer, "TipoPorto", record.port.as_code())?;
    write_field(writer, "TipoCollo", record.package_type.as_code())?;
    write_field(writer, "TipoSpedizione", record.shipment_type.as_code())?;
    write_field(writer, "FormatoPdf", record.pdf_format.as_code())?;
    write_field(writer, "Note", &record.notes)?;
    if let Some(phone) = &record.phone {
        write_field(writer, "Cellulare", phone)?;
    }
    if let Some(email) = &record.email {
        write_field(writer, "Email", email)?;
    }
    write_field(writer, "Bda", &record.reference)?;
    if record.cod_amount > 0.0 {
        write_field(writer, "ImportoContrassegno", &format!("{:.2}", record.cod_amount))?;
        if let Some(cod_type) = record.cod_type {
            write_field(writer, "TipoContrassegno", cod_type.as_code())?;
        }
    }
    Ok(())
}

/// Parse the per-record outcomes from an AddParcel response body.
fn parse_submit_response(xml: &str) -> Result<Vec<RecordOutcome>, CarrierError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut outcomes = Vec::new();
    let mut in_parcel = false;
    let mut current_tag: Option<String> = None;
    let mut reference = String::new();
    let mut shipment_number = String::new();
    let mut esito = String::new();
    let mut message = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_lowercase();
                if name == "parcel" {
                    in_parcel = true;
                    reference.clear();
                    shipment_number.clear();
                    esito.clear();
                    message.clear();
                } else if in_parcel {
                    current_tag = Some(name);
                }
            },
            Ok(Event::Text(t)) => {
                if let Some(tag) = &current_tag {
                    let text = t
                        .unescape()
                        .map_err(|e| CarrierError::Protocol(e.to_string()))?
                        .into_owned();
                    match tag.as_str() {
                        "numerospedizione" | "parcelid" => shipment_number = text,
                        "esito" | "result" => esito = text,
                        "errore" | "error" | "errormessage" => message = text,
                        "bda" => reference = text,
                        _ => {},
                    }
                }
            },
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_lowercase();
                if name == "parcel" {
                    in_parcel = false;
                    let accepted = esito.eq_ignore_ascii_case("OK") && !shipment_number.is_empty();
                    outcomes.push(RecordOutcome {
                        reference: reference.clone(),
                        shipment_number: (!shipment_number.is_empty())
                            .then(|| shipment_number.clone()),
                        accepted,
                        message: (!message.is_empty()).then(|| message.clone()),
                    });
                }
                current_tag = None;
            },
            Ok(Event::Eof) => break,
            Ok(_) => {},
            Err(e) => return Err(CarrierError::Protocol(e.to_string())),
        }
    }

    if outcomes.is_empty() {
        return Err(CarrierError::Protocol("no parcel outcomes in response".to_string()));
    }
    Ok(outcomes)
}

/// Parse the simple `<Esito>` acknowledgements (CloseWorkDay and friends).
fn parse_ack_response(xml: &str) -> Result<(), CarrierError> {
    let (esito, errore) = collect_simple_fields(xml, &["esito"], &["errore", "error"])?;
    if esito.eq_ignore_ascii_case("OK") {
        Ok(())
    } else {
        Err(CarrierError::Rejected(if errore.is_empty() {
            format!("esito '{}'", esito)
        } else {
            errore
        }))
    }
}

/// Parse a ListSped-style response into remote shipments.
fn parse_shipment_list(xml: &str) -> Result<Vec<RemoteShipment>, CarrierError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut shipments = Vec::new();
    let mut in_shipment = false;
    let mut current_tag: Option<String> = None;
    let mut number = String::new();
    let mut reference = String::new();
    let mut state = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_lowercase();
                if name == "spedizione" {
                    in_shipment = true;
                    number.clear();
                    reference.clear();
                    state.clear();
                } else if in_shipment {
                    current_tag = Some(name);
                }
            },
            Ok(Event::Text(t)) => {
                if let Some(tag) = &current_tag {
                    let text = t
                        .unescape()
                        .map_err(|e| CarrierError::Protocol(e.to_string()))?
                        .into_owned();
                    match tag.as_str() {
                        "numerospedizione" => number = text,
                        "bda" => reference = text,
                        "stato" | "state" => state = text,
                        _ => {},
                    }
                }
            },
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_lowercase();
                if name == "spedizione" {
                    in_shipment = false;
                    if !number.is_empty() {
                        shipments.push(RemoteShipment {
                            shipment_number: number.clone(),
                            reference: reference.clone(),
                            state: state.clone(),
                        });
                    }
                }
                current_tag = None;
            },
            Ok(Event::Eof) => break,
            Ok(_) => {},
            Err(e) => return Err(CarrierError::Protocol(e.to_string())),
        }
    }

    Ok(shipments)
}

fn collect_simple_fields(
    xml: &str,
    primary: &[&str],
    secondary: &[&str],
) -> Result<(String, String), CarrierError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut first = String::new();
    let mut second = String::new();
    let mut current_tag: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                current_tag = Some(String::from_utf8_lossy(e.name().as_ref()).to_lowercase());
            },
            Ok(Event::Text(t)) => {
                if let Some(tag) = &current_tag {
                    let text = t
                        .unescape()
                        .map_err(|e| CarrierError::Protocol(e.to_string()))?
                        .into_owned();
                    if primary.contains(&tag.as_str()) && first.is_empty() {
                        first = text;
                    } else if secondary.contains(&tag.as_str()) && second.is_empty() {
                        second = text;
                    }
                }
            },
            Ok(Event::End(_)) => current_tag = None,
            Ok(Event::Eof) => break,
            Ok(_) => {},
            Err(e) => return Err(CarrierError::Protocol(e.to_string())),
        }
    }

    Ok((first, second))
}

#[async_trait]
impl CarrierClient for HttpCarrierClient {
    async fn submit(&self, records: &[ShipmentRecord]) -> Result<Vec<RecordOutcome>, CarrierError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        if records.len() > MAX_BATCH_SIZE {
            return Err(CarrierError::Rejected(format!(
                "batch of {} exceeds the {}-record maximum",
                records.len(),
                MAX_BATCH_SIZE
            )));
        }

        let payload = self.build_submit_payload(records)?;
        let body = self.post_xml("AddParcel", payload).await?;
        let outcomes = parse_submit_response(&body)?;

        if outcomes.len() != records.len() {
            warn!(
                sent = records.len(),
                received = outcomes.len(),
                "carrier returned a partial outcome list"
            );
        }
        Ok(outcomes)
    }

    async fn confirm_open_shipments(&self) -> Result<(), CarrierError> {
        let payload = self.build_credentials_payload("Info")?;
        let body = self.post_xml("CloseWorkDay", payload).await?;
        parse_ack_response(&body)
    }

    async fn query_status(&self, reference: &str) -> Result<Option<RemoteShipment>, CarrierError> {
        let payload = self.build_credentials_payload("Info")?;
        let body = self.post_xml("ListSped", payload).await?;
        let shipments = parse_shipment_list(&body)?;
        Ok(shipments.into_iter().find(|s| s.reference == reference))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_submit_response_mixed() {
        let xml = r#"
            <Info>
              <Parcel>
                <NumeroSpedizione>123456</NumeroSpedizione>
                <Esito>OK</Esito>
                <Bda>20260830-1-0</Bda>
              </Parcel>
              <Parcel>
                <Esito>KO</Esito>
                <Errore>Bda duplicato</Errore>
                <Bda>20260830-2-1</Bda>
              </Parcel>
            </Info>"#;

        let outcomes = parse_submit_response(xml).unwrap();
        assert_eq!(outcomes.len(), 2);

        assert!(outcomes[0].accepted);
        assert_eq!(outcomes[0].shipment_number.as_deref(), Some("123456"));
        assert_eq!(outcomes[0].reference, "20260830-1-0");

        assert!(!outcomes[1].accepted);
        assert_eq!(outcomes[1].message.as_deref(), Some("Bda duplicato"));
    }

    #[test]
    fn test_parse_submit_response_without_parcels_is_protocol_error() {
        let err = parse_submit_response("<Info>qualcosa</Info>").unwrap_err();
        assert!(matches!(err, CarrierError::Protocol(_)));
    }

    #[test]
    fn test_ok_without_shipment_number_is_not_accepted() {
        let xml = "<Info><Parcel><Esito>OK</Esito><Bda>x</Bda></Parcel></Info>";
        let outcomes = parse_submit_response(xml).unwrap();
        assert!(!outcomes[0].accepted);
    }

    #[test]
    fn test_parse_ack_response() {
        assert!(parse_ack_response("<Info><Esito>OK</Esito></Info>").is_ok());
        let err =
            parse_ack_response("<Info><Esito>KO</Esito><Errore>chiusura negata</Errore></Info>")
                .unwrap_err();
        assert_eq!(err, CarrierError::Rejected("chiusura negata".to_string()));
    }

    #[test]
    fn test_parse_shipment_list() {
        let xml = r#"
            <Info>
              <Spedizione>
                <NumeroSpedizione>111</NumeroSpedizione>
                <Bda>ref-a</Bda>
                <Stato>IN CONSEGNA</Stato>
              </Spedizione>
              <Spedizione>
                <NumeroSpedizione>222</NumeroSpedizione>
                <Bda>ref-b</Bda>
              </Spedizione>
            </Info>"#;

        let shipments = parse_shipment_list(xml).unwrap();
        assert_eq!(shipments.len(), 2);
        assert_eq!(shipments[0].reference, "ref-a");
        assert_eq!(shipments[1].shipment_number, "222");
    }

    #[test]
    fn test_transient_classification() {
        assert!(CarrierError::Timeout.is_transient());
        assert!(CarrierError::Transport("x".into()).is_transient());
        assert!(CarrierError::Protocol("x".into()).is_transient());
        assert!(!CarrierError::Rejected("x".into()).is_transient());
    }
}
