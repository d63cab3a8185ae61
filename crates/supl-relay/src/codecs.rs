use std::path::Path;
use std::sync::Arc;

use supl_codec::{loader, MessageCodec, SchemaError};

/// Top-level SUPL message type.
pub const ULP_PDU: &str = "ULP-PDU";
/// Top-level RRLP message type.
pub const RRLP_PDU: &str = "PDU";
/// Top-level LPP message type.
pub const LPP_MESSAGE: &str = "LPP-Message";

/// The compiled grammars shared by every session.
///
/// SUPL is mandatory. RRLP and LPP are only used to expand embedded
/// positioning payloads in the traffic log and may be absent. Only the SUPL
/// grammar ships in `asn1/`; without `rrlp-*.yaml` / `lpp-*.yaml` files the
/// log shows those payloads as hex.
#[derive(Clone)]
pub struct Codecs {
    pub supl: Arc<dyn MessageCodec>,
    pub rrlp: Option<Arc<dyn MessageCodec>>,
    pub lpp: Option<Arc<dyn MessageCodec>>,
}

impl Codecs {
    /// Compile the `supl-*`, `rrlp-*` and `lpp-*` grammar files in `dir`.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let dir = dir.as_ref();
        let supl = loader::require_family(dir, "supl")?;
        let rrlp = loader::load_family(dir, "rrlp")?;
        let lpp = loader::load_family(dir, "lpp")?;

        if !supl.has_type(ULP_PDU) {
            return Err(SchemaError::UnresolvedReference {
                from: "supl".to_string(),
                referenced: ULP_PDU.to_string(),
            });
        }

        tracing::info!(
            dir = %dir.display(),
            rrlp = rrlp.is_some(),
            lpp = lpp.is_some(),
            "grammars compiled"
        );
        if rrlp.is_none() || lpp.is_none() {
            tracing::info!(
                dir = %dir.display(),
                "no rrlp-*/lpp-* grammar files; embedded positioning payloads are logged as hex"
            );
        }

        Ok(Self {
            supl: Arc::new(supl),
            rrlp: rrlp.map(|s| Arc::new(s) as Arc<dyn MessageCodec>),
            lpp: lpp.map(|s| Arc::new(s) as Arc<dyn MessageCodec>),
        })
    }
}

impl std::fmt::Debug for Codecs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codecs")
            .field("rrlp", &self.rrlp.is_some())
            .field("lpp", &self.lpp.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RRLP_GRAMMAR, ULP_GRAMMAR};

    #[test]
    fn loads_families_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("supl-ulp.yaml"), ULP_GRAMMAR).unwrap();
        std::fs::write(dir.path().join("rrlp-pdu.yaml"), RRLP_GRAMMAR).unwrap();

        let codecs = Codecs::load(dir.path()).unwrap();
        assert!(codecs.rrlp.is_some());
        assert!(codecs.lpp.is_none());
    }

    #[test]
    fn missing_supl_grammar_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("rrlp-pdu.yaml"), RRLP_GRAMMAR).unwrap();
        assert!(matches!(
            Codecs::load(dir.path()),
            Err(SchemaError::NoFiles { .. })
        ));
    }

    #[test]
    fn supl_grammar_without_pdu_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("supl-misc.yaml"),
            "module: Misc\ntypes:\n  Flag: BOOLEAN\n",
        )
        .unwrap();
        assert!(Codecs::load(dir.path()).is_err());
    }
}
