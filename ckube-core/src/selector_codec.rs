//! Encode/decode a [`Paginate`] through the `labelSelector` string accepted
//! by Kubernetes list calls, plus the sibling tunnels used by verbs that
//! carry no selector at all.
//!
//! Grounded in the wire grammar: a fixed annotation-style key holds a
//! `notin (…)` requirement whose values are `<offset>.<base64url-chunk>`
//! pieces of the paginate JSON, ordered by their zero-padded offset so that
//! lexicographic (= numeric, since offsets are zero-padded) ordering of the
//! `BTreeSet` the requirement's values live in reconstructs the original
//! payload.
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ckube_wire::labels::{Expression, Selector};

use crate::{error::Error, Paginate};

/// The fixed label key used as the selector-tunnel anchor.
pub const PAGINATE_KEY: &str = "dsm.daocloud.io/query";

/// The sentinel prefix used by the `fieldManager`/`resourceVersion`/
/// `dryRun[0]` tunnels for verbs that carry no selector.
pub const CLUSTER_PREFIX: &str = "dsm-cluster-";

/// Maximum characters of base64 payload carried per chunk. Each chunk is
/// itself prefixed with `<4-digit-offset>.`, but the offset isn't counted
/// against this limit; it's a separate, fixed-width field.
const CHUNK_LEN: usize = 56;

/// Encode `paginate` into `selector`, inserting the tunnel requirement
/// before any existing requirements.
pub fn encode(selector: &str, paginate: &Paginate) -> Result<String, Error> {
    let json = serde_json::to_vec(paginate).map_err(|e| Error::MalformedPaginate(e.to_string()))?;
    let payload = URL_SAFE_NO_PAD.encode(json);

    let mut values = std::collections::BTreeSet::new();
    for (offset, chunk) in (0..payload.len()).step_by(CHUNK_LEN).enumerate() {
        let end = (chunk + CHUNK_LEN).min(payload.len());
        values.insert(format!("{:04}.{}", offset * CHUNK_LEN, &payload[chunk..end]));
    }
    if values.is_empty() {
        // An empty paginate still round-trips: `{}` base64-encodes to a
        // non-empty string, so this only triggers for a payload that
        // somehow encoded to nothing.
        values.insert("0000.".to_string());
    }

    let mut tunnel = Selector::new();
    tunnel.push(Expression::NotIn(PAGINATE_KEY.to_string(), values));

    let existing = if selector.trim().is_empty() {
        Selector::new()
    } else {
        Selector::parse(selector)?
    };
    for expr in existing.expressions().to_vec() {
        tunnel.push(expr);
    }
    Ok(tunnel.to_selector_string())
}

/// Decode a tunneled selector into its [`Paginate`] and the residual
/// (non-tunnel) selector that should still be applied, e.g. by filtering
/// the store's query results in memory.
pub fn decode(selector: &str) -> Result<(Paginate, Selector), Error> {
    let mut parsed = if selector.trim().is_empty() {
        Selector::new()
    } else {
        Selector::parse(selector)?
    };

    let tunnel_requirements = parsed.take_key(PAGINATE_KEY);
    let mut chunk_values = std::collections::BTreeSet::new();
    for expr in tunnel_requirements {
        if let Expression::NotIn(_, values) = expr {
            chunk_values.extend(values);
        }
    }

    if chunk_values.is_empty() {
        return Ok((Paginate::default(), parsed));
    }

    let mut payload = String::new();
    for value in &chunk_values {
        let chunk = value
            .split_once('.')
            .map(|(_, chunk)| chunk)
            .ok_or_else(|| Error::MalformedPaginate(format!("chunk missing offset prefix: {value}")))?;
        payload.push_str(chunk);
    }

    let json = URL_SAFE_NO_PAD
        .decode(payload.as_bytes())
        .map_err(|e| Error::MalformedPaginate(e.to_string()))?;
    let paginate: Paginate =
        serde_json::from_slice(&json).map_err(|e| Error::MalformedPaginate(e.to_string()))?;

    Ok((paginate, parsed))
}

/// Strip the `dsm-cluster-` prefix from a `fieldManager`, `resourceVersion`,
/// or `dryRun[0]` value, returning the target cluster name if present.
pub fn decode_cluster_tunnel(value: &str) -> Option<&str> {
    value.strip_prefix(CLUSTER_PREFIX)
}

/// Build a `fieldManager`/`resourceVersion`/`dryRun[0]` value tunneling the
/// given cluster name.
pub fn encode_cluster_tunnel(cluster: &str) -> String {
    format!("{CLUSTER_PREFIX}{cluster}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_simple_pagination() {
        let p = Paginate {
            page: 1,
            ..Default::default()
        };
        let encoded = encode("", &p).unwrap();
        assert_eq!(encoded, "dsm.daocloud.io/query notin (0000.eyJwYWdlIjoxfQ)");
    }

    #[test]
    fn encode_preserves_existing_requirement() {
        let p = Paginate {
            page: 1,
            search: "name=ok".into(),
            ..Default::default()
        };
        let encoded = encode("test=1", &p).unwrap();
        assert!(encoded.starts_with("dsm.daocloud.io/query notin ("));
        assert!(encoded.ends_with(",test=1"));
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let p = Paginate {
            page: 3,
            page_size: 25,
            sort: "name desc".into(),
            search: "name=ok".into(),
        };
        let encoded = encode("env=prod", &p).unwrap();
        let (decoded, residual) = decode(&encoded).unwrap();
        assert_eq!(decoded, p);
        assert_eq!(residual.to_selector_string(), "env=prod");
    }

    #[test]
    fn chunks_long_payloads_and_reassembles_in_order() {
        let p = Paginate {
            search: "x".repeat(500),
            ..Default::default()
        };
        let encoded = encode("", &p).unwrap();
        let (decoded, _) = decode(&encoded).unwrap();
        assert_eq!(decoded, p);
    }

    #[test]
    fn cluster_tunnel_round_trips() {
        let value = encode_cluster_tunnel("prod");
        assert_eq!(value, "dsm-cluster-prod");
        assert_eq!(decode_cluster_tunnel(&value), Some("prod"));
        assert_eq!(decode_cluster_tunnel("dsm-cluster-"), Some(""));
        assert_eq!(decode_cluster_tunnel("something-else"), None);
    }

    #[test]
    fn rejects_unsupported_operators() {
        let err = decode("level>2").unwrap_err();
        assert!(matches!(err, Error::Selector(_)));
    }
}
