//! Verification hooks shipped with the proxy

use mosaic_tls::rustls;
use mosaic_tls::{ExtensionParams, Hook, HookRegistry, TlsError};
use std::collections::HashSet;

pub const COMMON_NAME_HOOK: &str = "common_name";

/// Register the built-in hook factories
pub fn register_builtin(registry: &mut HookRegistry) -> Result<(), TlsError> {
    registry.register(COMMON_NAME_HOOK, common_name)?;
    Ok(())
}

/// Peer must chain to the trust pool and carry an allowed subject CN.
///
/// `cn` is a single name or a list of names.
fn common_name(params: &ExtensionParams) -> Result<Hook, TlsError> {
    let invalid = |reason: &str| TlsError::HookParams {
        extension_type: COMMON_NAME_HOOK.to_string(),
        reason: reason.to_string(),
    };

    let allowed: HashSet<String> = match params.get("cn") {
        Some(serde_json::Value::String(cn)) => HashSet::from([cn.clone()]),
        Some(serde_json::Value::Array(names)) => names
            .iter()
            .map(|name| name.as_str().map(str::to_string))
            .collect::<Option<_>>()
            .ok_or_else(|| invalid("cn entries must be strings"))?,
        Some(_) => return Err(invalid("cn must be a string or a list of strings")),
        None => return Err(invalid("missing cn")),
    };
    if allowed.is_empty() {
        return Err(invalid("cn list is empty"));
    }

    Ok(Hook::new().with_peer_verifier(move |chain| {
        chain.verify_to_roots()?;
        match chain.common_name()? {
            Some(cn) if allowed.contains(&cn) => Ok(()),
            Some(cn) => Err(rustls::Error::General(format!(
                "peer common name '{cn}' is not allowed"
            ))),
            None => Err(rustls::Error::General(
                "peer certificate has no common name".to_string(),
            )),
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(value: serde_json::Value) -> ExtensionParams {
        let mut params = ExtensionParams::new();
        params.insert("cn".to_string(), value);
        params
    }

    fn registry() -> HookRegistry {
        let mut registry = HookRegistry::new();
        register_builtin(&mut registry).unwrap();
        registry
    }

    #[test]
    fn registers_common_name() {
        assert!(registry().contains(COMMON_NAME_HOOK));
    }

    #[test]
    fn accepts_single_name_and_list() {
        let registry = registry();
        let hook = registry
            .resolve(COMMON_NAME_HOOK, &params("orders".into()))
            .unwrap();
        assert!(hook.overrides_verification());

        let hook = registry
            .resolve(
                COMMON_NAME_HOOK,
                &params(serde_json::json!(["orders", "billing"])),
            )
            .unwrap();
        assert!(hook.overrides_verification());
    }

    #[test]
    fn rejects_bad_params() {
        let registry = registry();
        for bad in [
            serde_json::json!(42),
            serde_json::json!([]),
            serde_json::json!(["ok", 1]),
        ] {
            let err = registry.resolve(COMMON_NAME_HOOK, &params(bad)).unwrap_err();
            assert!(matches!(err, TlsError::HookParams { .. }));
        }

        let err = registry
            .resolve(COMMON_NAME_HOOK, &ExtensionParams::new())
            .unwrap_err();
        assert!(matches!(err, TlsError::HookParams { .. }));
    }
}
