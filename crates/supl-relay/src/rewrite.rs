//! Identity substitution on the wire value and annotation of a separate
//! display tree for the traffic log.

use std::sync::Arc;

use serde_json::Value;
use supl_codec::{MessageCodec, Step, StructuredValue};

use crate::codecs::{Codecs, LPP_MESSAGE, RRLP_PDU};
use crate::display;
use crate::identity::Imsi;
use crate::tbcd::TbcdError;

/// `sessionID.setSessionID.setId`, variant `imsi`.
const IMSI_PATH: [Step<'static>; 4] = [
    Step::Field("sessionID"),
    Step::Field("setSessionID"),
    Step::Field("setId"),
    Step::Variant("imsi"),
];

/// Where a `PosPayLoad` can sit inside a ULP-PDU.
const POS_PAYLOAD_PATHS: [&[Step<'static>]; 2] = [
    &[
        Step::Field("message"),
        Step::Variant("msSUPLPOS"),
        Step::Field("posPayLoad"),
    ],
    &[
        Step::Field("message"),
        Step::Variant("msSUPLPOSINIT"),
        Step::Field("sUPLPOS"),
        Step::Field("posPayLoad"),
    ],
];

const RRLP_PAYLOAD: Step<'static> = Step::Variant("rrlpPayload");
const LPP_PAYLOADS: [Step<'static>; 2] = [
    Step::Variant("ver2-PosPayLoad-extension"),
    Step::Field("lPPPayload"),
];

/// Subscriber identity carried by a decoded ULP-PDU.
pub fn identity(pdu: &StructuredValue) -> Option<Imsi> {
    pdu.lookup(&IMSI_PATH)
        .and_then(StructuredValue::as_bytes)
        .map(Imsi::from_tbcd)
}

/// Replace the identity of `pdu` with `replacement` and return the identity
/// it carried before.
///
/// A message without an `imsi` set identity is left untouched and yields
/// `Ok(None)`. With no replacement the message is only inspected.
pub fn substitute_identity(
    pdu: &mut StructuredValue,
    replacement: Option<&Imsi>,
) -> Result<Option<Imsi>, TbcdError> {
    let Some(node) = pdu.lookup_mut(&IMSI_PATH) else {
        return Ok(None);
    };
    let Some(current) = node.as_bytes() else {
        return Ok(None);
    };
    let original = Imsi::from_tbcd(current);
    let width = current.len();

    if let Some(replacement) = replacement {
        let mut wire = replacement.to_tbcd()?;
        if wire.len() < width {
            wire.resize(width, 0xff);
        }
        *node = StructuredValue::bytes(wire);
    }
    Ok(Some(original))
}

/// Build the display tree of a decoded ULP-PDU.
///
/// `subscriber` is shown in place of the identity field when given;
/// otherwise the field's own digits are shown. Embedded RRLP and LPP
/// payloads are expanded through their grammars and position estimates are
/// converted to degrees. `pdu` itself is never modified.
pub fn annotate(pdu: &StructuredValue, codecs: &Codecs, subscriber: Option<&Imsi>) -> Value {
    let mut view = display::to_json(pdu);

    if let Some(slot) = json_lookup_mut(&mut view, &IMSI_PATH) {
        if let Some(imsi) = subscriber.cloned().or_else(|| identity(pdu)) {
            *slot = Value::String(imsi.to_string());
        }
    }

    for base in POS_PAYLOAD_PATHS {
        let Some(payload) = pdu.lookup(base) else {
            continue;
        };
        let Some(shown) = json_lookup_mut(&mut view, base) else {
            continue;
        };

        if let Some(bytes) = payload.lookup(&[RRLP_PAYLOAD]).and_then(StructuredValue::as_bytes) {
            if let (Some(slot), Some(expanded)) = (
                json_lookup_mut(shown, &[RRLP_PAYLOAD]),
                expand(codecs.rrlp.as_ref(), RRLP_PDU, bytes),
            ) {
                *slot = expanded;
            }
        }

        if let Some(items) = payload.lookup(&LPP_PAYLOADS).and_then(StructuredValue::as_list) {
            let Some(Value::Array(slots)) = json_lookup_mut(shown, &LPP_PAYLOADS) else {
                continue;
            };
            for (item, slot) in items.iter().zip(slots.iter_mut()) {
                let expanded = item
                    .as_bytes()
                    .and_then(|bytes| expand(codecs.lpp.as_ref(), LPP_MESSAGE, bytes));
                if let Some(expanded) = expanded {
                    *slot = expanded;
                }
            }
        }
    }

    display::convert_positions(&mut view);
    view
}

/// Decode an embedded payload for display. `None` leaves the hex in place.
fn expand(codec: Option<&Arc<dyn MessageCodec>>, message_type: &str, bytes: &[u8]) -> Option<Value> {
    let codec = codec?;
    Some(match codec.decode(message_type, bytes) {
        Ok(decoded) => display::to_json(&decoded),
        Err(err) => serde_json::json!({
            "hex": display::hex(bytes),
            "error": err.to_string(),
        }),
    })
}

/// Follow a path through a rendered tree. Choices render as single-key
/// objects, so fields and variants are both object keys.
fn json_lookup_mut<'v>(view: &'v mut Value, path: &[Step<'_>]) -> Option<&'v mut Value> {
    path.iter().try_fold(view, |node, step| match *step {
        Step::Field(key) | Step::Variant(key) => node.get_mut(key),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use supl_codec::Leaf;

    const SUBSCRIBER: &str = "262011234567890";

    fn suplpos(payload: StructuredValue) -> StructuredValue {
        StructuredValue::choice(
            "msSUPLPOS",
            StructuredValue::sequence([("posPayLoad", payload)]),
        )
    }

    #[test]
    fn substitutes_imsi_and_returns_original() {
        let mut msg = pdu(Some(set_id_imsi(SUBSCRIBER)), suplstart());
        let fake = Imsi::fabricate("26201").unwrap();

        let original = substitute_identity(&mut msg, Some(&fake)).unwrap();

        assert_eq!(original.unwrap().as_str(), SUBSCRIBER);
        assert_eq!(identity(&msg), Some(fake));
    }

    #[test]
    fn substituted_message_still_encodes() {
        let codecs = codecs();
        let mut msg = pdu(Some(set_id_imsi(SUBSCRIBER)), suplstart());
        let fake = Imsi::fabricate("26201").unwrap();
        substitute_identity(&mut msg, Some(&fake)).unwrap();

        let bytes = wire(&codecs, &msg);
        assert_eq!(imsi_on_wire(&codecs, &bytes).as_deref(), Some(fake.as_str()));
    }

    #[test]
    fn short_replacement_is_padded_to_field_width() {
        let mut msg = pdu(Some(set_id_imsi(SUBSCRIBER)), suplstart());
        let short = Imsi::parse("2620112").unwrap();
        substitute_identity(&mut msg, Some(&short)).unwrap();

        let node = msg.lookup(&IMSI_PATH).and_then(StructuredValue::as_bytes).unwrap();
        assert_eq!(node.len(), 8);
        assert_eq!(identity(&msg), Some(short));
    }

    #[test]
    fn no_replacement_only_captures() {
        let mut msg = pdu(Some(set_id_imsi(SUBSCRIBER)), suplstart());
        let before = msg.clone();
        let original = substitute_identity(&mut msg, None).unwrap();
        assert_eq!(original.unwrap().as_str(), SUBSCRIBER);
        assert_eq!(msg, before);
    }

    #[test]
    fn absent_or_other_identity_is_a_no_op() {
        let fake = Imsi::fabricate("26201").unwrap();

        let mut no_session = pdu(None, suplstart());
        let before = no_session.clone();
        assert_eq!(substitute_identity(&mut no_session, Some(&fake)).unwrap(), None);
        assert_eq!(no_session, before);

        let msisdn = StructuredValue::choice("msisdn", StructuredValue::bytes(vec![0x11; 8]));
        let mut other = pdu(Some(msisdn), suplstart());
        let before = other.clone();
        assert_eq!(substitute_identity(&mut other, Some(&fake)).unwrap(), None);
        assert_eq!(other, before);

        let mut leaf = StructuredValue::integer(3);
        assert_eq!(substitute_identity(&mut leaf, Some(&fake)).unwrap(), None);
    }

    #[test]
    fn display_shows_threaded_subscriber() {
        let codecs = codecs();
        let fake = Imsi::fabricate("26201").unwrap();
        let real = Imsi::parse(SUBSCRIBER).unwrap();
        let mut msg = pdu(Some(set_id_imsi(SUBSCRIBER)), suplresponse());
        substitute_identity(&mut msg, Some(&fake)).unwrap();

        let view = annotate(&msg, &codecs, Some(&real));
        assert_eq!(
            view["sessionID"]["setSessionID"]["setId"]["imsi"],
            Value::String(SUBSCRIBER.to_string())
        );
        // The wire value keeps the fabricated identity.
        assert_eq!(identity(&msg), Some(fake));
    }

    #[test]
    fn display_without_subscriber_shows_field_digits() {
        let codecs = codecs();
        let msg = pdu(Some(set_id_imsi(SUBSCRIBER)), suplstart());
        let view = annotate(&msg, &codecs, None);
        assert_eq!(view["sessionID"]["setSessionID"]["setId"]["imsi"], SUBSCRIBER);
    }

    #[test]
    fn expands_rrlp_payload_for_display_only() {
        let codecs = codecs();
        let rrlp = rrlp_bytes(&codecs);
        let msg = pdu(
            Some(set_id_imsi(SUBSCRIBER)),
            suplpos(StructuredValue::choice(
                "rrlpPayload",
                StructuredValue::bytes(rrlp.clone()),
            )),
        );
        let before = msg.clone();

        let view = annotate(&msg, &codecs, None);
        let shown = &view["message"]["msSUPLPOS"]["posPayLoad"]["rrlpPayload"];
        assert_eq!(shown["referenceNumber"], 3);
        assert!(shown["component"].get("assistanceDataAck").is_some());

        assert_eq!(msg, before);
        assert_eq!(
            wire(&codecs, &msg),
            wire(&codecs, &before),
            "display pass must not change wire bytes"
        );
    }

    #[test]
    fn expands_each_lpp_payload() {
        let codecs = codecs();
        let lpp = lpp_bytes(&codecs);
        let payload = StructuredValue::choice(
            "ver2-PosPayLoad-extension",
            StructuredValue::sequence([(
                "lPPPayload",
                StructuredValue::List(vec![
                    StructuredValue::bytes(lpp.clone()),
                    StructuredValue::bytes(lpp),
                ]),
            )]),
        );
        let inner = StructuredValue::sequence([("posPayLoad", payload)]);
        let msg = pdu(
            None,
            StructuredValue::choice(
                "msSUPLPOSINIT",
                StructuredValue::sequence([("sUPLPOS", inner)]),
            ),
        );

        let view = annotate(&msg, &codecs, None);
        let list = &view["message"]["msSUPLPOSINIT"]["sUPLPOS"]["posPayLoad"]
            ["ver2-PosPayLoad-extension"]["lPPPayload"];
        assert_eq!(list.as_array().unwrap().len(), 2);
        assert_eq!(list[1]["transactionNumber"], 9);
        assert_eq!(list[1]["endTransaction"], true);
    }

    #[test]
    fn undecodable_payload_shows_hex_and_error() {
        let codecs = codecs();
        let msg = pdu(
            None,
            suplpos(StructuredValue::choice(
                "rrlpPayload",
                StructuredValue::bytes(vec![0xff]),
            )),
        );
        let view = annotate(&msg, &codecs, None);
        let shown = &view["message"]["msSUPLPOS"]["posPayLoad"]["rrlpPayload"];
        assert_eq!(shown["hex"], "ff");
        assert!(shown["error"].as_str().is_some());
    }

    #[test]
    fn payload_stays_hex_without_nested_grammar() {
        let mut codecs = codecs();
        codecs.rrlp = None;
        let msg = pdu(
            None,
            suplpos(StructuredValue::choice(
                "rrlpPayload",
                StructuredValue::bytes(vec![0x01, 0x02]),
            )),
        );
        let view = annotate(&msg, &codecs, None);
        assert_eq!(view["message"]["msSUPLPOS"]["posPayLoad"]["rrlpPayload"], "01 02");
    }

    #[test]
    fn positions_are_shown_in_degrees() {
        let codecs = codecs();
        let msg = pdu(None, suplend_at(1 << 22, 1 << 21));
        let view = annotate(&msg, &codecs, None);
        let position = &view["message"]["msSUPLEND"]["position"];
        assert_eq!(position["positionEstimate"]["latitude"], 45.0);
        assert_eq!(position["positionEstimate"]["longitude"], 45.0);
        assert_eq!(position["timestamp"], "2024-02-29 13:30:05 UTC");

        // Raw units are untouched on the wire value.
        let raw = msg.lookup(&[
            Step::Field("message"),
            Step::Variant("msSUPLEND"),
            Step::Field("position"),
            Step::Field("positionEstimate"),
            Step::Field("latitude"),
        ]);
        assert_eq!(raw.and_then(StructuredValue::as_integer), Some(1 << 22));
        assert!(matches!(
            msg.lookup(&[
                Step::Field("message"),
                Step::Variant("msSUPLEND"),
                Step::Field("position"),
                Step::Field("timestamp"),
            ]),
            Some(StructuredValue::Leaf(Leaf::Time(_)))
        ));
    }
}
