//! Small grammars and message builders shared by the unit tests.

use std::sync::Arc;

use supl_codec::{loader, Leaf, MessageCodec, StructuredValue};

use crate::codecs::{Codecs, LPP_MESSAGE, RRLP_PDU, ULP_PDU};
use crate::framer::stamp_length;
use crate::tbcd;

/// A cut-down ULP grammar with the real field names along the paths the
/// relay touches.
pub const ULP_GRAMMAR: &str = r#"
module: ULP-Test
types:
  ULP-PDU:
    sequence:
      fields:
        - { name: length, type: { integer: { min: 0, max: 65535 } } }
        - { name: version, type: Version }
        - { name: sessionID, type: SessionID }
        - { name: message, type: UlpMessage }
  Version:
    sequence:
      fields:
        - { name: maj, type: { integer: { min: 0, max: 255 } } }
        - { name: min, type: { integer: { min: 0, max: 255 } } }
        - { name: servind, type: { integer: { min: 0, max: 255 } } }
  SessionID:
    sequence:
      fields:
        - { name: setSessionID, type: SetSessionID, optional: true }
        - { name: slpSessionID, type: SlpSessionID, optional: true }
  SetSessionID:
    sequence:
      fields:
        - { name: sessionId, type: { integer: { min: 0, max: 65535 } } }
        - { name: setId, type: SETId }
  SETId:
    choice:
      alternatives:
        - { name: msisdn, type: { octet-string: { size: 8 } } }
        - { name: mdn, type: { octet-string: { size: 8 } } }
        - { name: min, type: { bit-string: { size: 34 } } }
        - { name: imsi, type: { octet-string: { size: 8 } } }
      extensible: true
  SlpSessionID:
    sequence:
      fields:
        - { name: sessionID, type: { octet-string: { size: 4 } } }
        - { name: slpId, type: { choice: { alternatives: [ { name: ipv4Address, type: { octet-string: { size: 4 } } } ] } } }
  UlpMessage:
    choice:
      alternatives:
        - { name: msSUPLSTART, type: SUPLSTART }
        - { name: msSUPLRESPONSE, type: SUPLRESPONSE }
        - { name: msSUPLPOSINIT, type: SUPLPOSINIT }
        - { name: msSUPLPOS, type: SUPLPOS }
        - { name: msSUPLEND, type: SUPLEND }
      extensible: true
  SUPLSTART:
    sequence:
      fields:
        - { name: rrlp, type: BOOLEAN }
      extensible: true
  SUPLRESPONSE:
    sequence:
      fields:
        - { name: posMethod, type: { enumerated: { values: [agpsSETassisted, agpsSETbased, noPosition], extensible: true } } }
      extensible: true
  SUPLPOSINIT:
    sequence:
      fields:
        - { name: position, type: Position, optional: true }
        - { name: sUPLPOS, type: SUPLPOS, optional: true }
      extensible: true
  SUPLPOS:
    sequence:
      fields:
        - { name: posPayLoad, type: PosPayLoad }
      extensible: true
  PosPayLoad:
    choice:
      alternatives:
        - { name: tia801payload, type: { octet-string: { size: { min: 1, max: 8192 } } } }
        - { name: rrcPayload, type: { octet-string: { size: { min: 1, max: 8192 } } } }
        - { name: rrlpPayload, type: { octet-string: { size: { min: 1, max: 8192 } } } }
      extensible: true
      extensions:
        - { name: ver2-PosPayLoad-extension, type: Ver2-PosPayLoad-extension }
  Ver2-PosPayLoad-extension:
    sequence:
      fields:
        - { name: lPPPayload, type: { sequence-of: { item: { octet-string: { size: { min: 1, max: 60000 } } }, size: { min: 1, max: 3 } } }, optional: true }
        - { name: tIA801Payload, type: { sequence-of: { item: { octet-string: { size: { min: 1, max: 60000 } } }, size: { min: 1, max: 3 } } }, optional: true }
      extensible: true
  SUPLEND:
    sequence:
      fields:
        - { name: position, type: Position, optional: true }
        - { name: statusCode, type: { enumerated: { values: [unspecified, systemFailure], extensible: true } }, optional: true }
      extensible: true
  Position:
    sequence:
      fields:
        - { name: timestamp, type: UTCTime }
        - { name: positionEstimate, type: PositionEstimate }
      extensible: true
  PositionEstimate:
    sequence:
      fields:
        - { name: latitudeSign, type: { enumerated: { values: [north, south] } } }
        - { name: latitude, type: { integer: { min: 0, max: 8388607 } } }
        - { name: longitude, type: { integer: { min: -8388608, max: 8388607 } } }
      extensible: true
"#;

pub const RRLP_GRAMMAR: &str = r#"
module: RRLP-Test
types:
  PDU:
    sequence:
      fields:
        - { name: referenceNumber, type: { integer: { min: 0, max: 7 } } }
        - { name: component, type: RRLP-Component }
  RRLP-Component:
    choice:
      alternatives:
        - { name: msrPositionReq, type: { integer: { min: 0, max: 255 } } }
        - { name: assistanceDataAck, type: NULL }
      extensible: true
"#;

pub const LPP_GRAMMAR: &str = r#"
module: LPP-Test
types:
  LPP-Message:
    sequence:
      fields:
        - { name: transactionNumber, type: { integer: { min: 0, max: 255 } } }
        - { name: endTransaction, type: BOOLEAN }
"#;

pub fn codecs() -> Codecs {
    let supl = loader::schema_from_str("supl", &[ULP_GRAMMAR]).unwrap();
    let rrlp = loader::schema_from_str("rrlp", &[RRLP_GRAMMAR]).unwrap();
    let lpp = loader::schema_from_str("lpp", &[LPP_GRAMMAR]).unwrap();
    Codecs {
        supl: Arc::new(supl),
        rrlp: Some(Arc::new(rrlp)),
        lpp: Some(Arc::new(lpp)),
    }
}

pub fn set_id_imsi(digits: &str) -> StructuredValue {
    let mut wire = tbcd::encode(digits).unwrap();
    wire.resize(8, 0xff);
    StructuredValue::choice("imsi", StructuredValue::bytes(wire))
}

/// A ULP-PDU with the given set identity and message body.
pub fn pdu(set_id: Option<StructuredValue>, message: StructuredValue) -> StructuredValue {
    let session = match set_id {
        Some(set_id) => StructuredValue::sequence([(
            "setSessionID",
            StructuredValue::sequence([
                ("sessionId", StructuredValue::integer(7)),
                ("setId", set_id),
            ]),
        )]),
        None => StructuredValue::Sequence(Vec::new()),
    };
    StructuredValue::sequence([
        ("length", StructuredValue::integer(0)),
        (
            "version",
            StructuredValue::sequence([
                ("maj", StructuredValue::integer(2)),
                ("min", StructuredValue::integer(0)),
                ("servind", StructuredValue::integer(0)),
            ]),
        ),
        ("sessionID", session),
        ("message", message),
    ])
}

pub fn suplstart() -> StructuredValue {
    StructuredValue::choice(
        "msSUPLSTART",
        StructuredValue::sequence([("rrlp", StructuredValue::boolean(true))]),
    )
}

pub fn suplresponse() -> StructuredValue {
    StructuredValue::choice(
        "msSUPLRESPONSE",
        StructuredValue::sequence([(
            "posMethod",
            StructuredValue::enumerated("agpsSETassisted"),
        )]),
    )
}

pub fn suplend_at(latitude: i64, longitude: i64) -> StructuredValue {
    StructuredValue::choice(
        "msSUPLEND",
        StructuredValue::sequence([(
            "position",
            StructuredValue::sequence([
                (
                    "timestamp",
                    StructuredValue::Leaf(Leaf::Time("240229133005Z".to_string())),
                ),
                (
                    "positionEstimate",
                    StructuredValue::sequence([
                        ("latitudeSign", StructuredValue::enumerated("north")),
                        ("latitude", StructuredValue::integer(latitude)),
                        ("longitude", StructuredValue::integer(longitude)),
                    ]),
                ),
            ]),
        )]),
    )
}

/// Encode a ULP-PDU and fix up its length prefix.
pub fn wire(codecs: &Codecs, value: &StructuredValue) -> Vec<u8> {
    let mut bytes = codecs.supl.encode(ULP_PDU, value).unwrap();
    stamp_length(&mut bytes).unwrap();
    bytes
}

pub fn rrlp_bytes(codecs: &Codecs) -> Vec<u8> {
    let v = StructuredValue::sequence([
        ("referenceNumber", StructuredValue::integer(3)),
        (
            "component",
            StructuredValue::choice("assistanceDataAck", StructuredValue::null()),
        ),
    ]);
    codecs.rrlp.as_ref().unwrap().encode(RRLP_PDU, &v).unwrap()
}

pub fn lpp_bytes(codecs: &Codecs) -> Vec<u8> {
    let v = StructuredValue::sequence([
        ("transactionNumber", StructuredValue::integer(9)),
        ("endTransaction", StructuredValue::boolean(true)),
    ]);
    codecs.lpp.as_ref().unwrap().encode(LPP_MESSAGE, &v).unwrap()
}

/// Digits carried in the imsi field of an encoded ULP-PDU, if any.
pub fn imsi_on_wire(codecs: &Codecs, bytes: &[u8]) -> Option<String> {
    let v = codecs.supl.decode(ULP_PDU, bytes).ok()?;
    crate::rewrite::identity(&v).map(|imsi| imsi.to_string())
}
