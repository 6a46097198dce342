use crate::{
    registry::{Arg, MethodEntry},
    services::{Instance, ServiceDescriptor},
    signature::Visibility,
};
use serde::{Deserialize, Serialize};

/// Which methods the receiving side lets a remote peer call.
///
/// Every rule must pass; the first one that fails names the denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct AccessPolicy {
    pub allow_static: bool,
    pub allow_private: bool,
    pub allow_special: bool,
    /// Static methods whose declaring type is not a registered service.
    pub allow_non_service_static: bool,
    pub require_callable_marker: bool,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            allow_static: true,
            allow_private: false,
            allow_special: false,
            allow_non_service_static: true,
            require_callable_marker: false,
        }
    }
}

impl AccessPolicy {
    /// Everything callable. Useful between trusted peers and in tests.
    pub fn permissive() -> Self {
        Self {
            allow_static: true,
            allow_private: true,
            allow_special: true,
            allow_non_service_static: true,
            require_callable_marker: false,
        }
    }

    pub fn check(
        &self,
        entry: &MethodEntry,
        service: Option<&ServiceDescriptor>,
        instance: Option<&Instance>,
    ) -> Result<(), String> {
        let sig = entry.signature();
        let meta = entry.meta();

        if sig.is_static() {
            if !self.allow_static {
                return Err("static methods are not allowed".into());
            }
            if service.is_none() && !self.allow_non_service_static {
                return Err("static methods on non-service types are not allowed".into());
            }
        } else if instance.is_none() {
            return Err("instance method called without an instance".into());
        }
        if meta.special_name && !self.allow_special {
            return Err("special methods are not allowed".into());
        }
        if meta.visibility == Visibility::Private && !self.allow_private {
            return Err("private methods are not allowed".into());
        }
        if self.require_callable_marker && !meta.callable_marker {
            return Err("method is not marked callable".into());
        }
        Ok(())
    }
}

/// An application hook consulted after the [`AccessPolicy`] passes, with the
/// arguments already bound. Returning `Err` denies the call with that message.
pub trait CallGuard: Send + Sync + 'static {
    fn check(&self, entry: &MethodEntry, args: &[Arg]) -> Result<(), String>;
}

impl<F> CallGuard for F
where
    F: Fn(&MethodEntry, &[Arg]) -> Result<(), String> + Send + Sync + 'static,
{
    fn check(&self, entry: &MethodEntry, args: &[Arg]) -> Result<(), String> {
        self(entry, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        registry::{Invocation, MethodRegistry},
        services::{Lifetime, ServiceKey},
        signature::{MethodMeta, MethodSignature},
    };
    use std::sync::Arc;

    struct Vault;

    fn entry(sig: MethodSignature, meta: MethodMeta) -> Arc<MethodEntry> {
        let mut registry = MethodRegistry::new();
        let desc = sig.descriptor();
        registry.register(sig, meta, |_inv: Invocation| async { anyhow::Ok(()) });
        registry.resolve(&desc).unwrap()
    }

    fn vault_service() -> ServiceDescriptor {
        ServiceDescriptor {
            service: ServiceKey::of::<Vault>(),
            lifetime: Lifetime::Singleton,
            key: None,
        }
    }

    #[test]
    fn private_is_denied_by_default() {
        let e = entry(MethodSignature::method::<Vault>("open"), MethodMeta::private());
        let instance: Instance = Arc::new(Vault);
        let err = AccessPolicy::default()
            .check(&e, Some(&vault_service()), Some(&instance))
            .unwrap_err();
        assert_eq!(err, "private methods are not allowed");

        let permissive = AccessPolicy::permissive();
        assert!(permissive.check(&e, Some(&vault_service()), Some(&instance)).is_ok());
    }

    #[test]
    fn static_rules() {
        let free = entry(MethodSignature::function("Util", "now"), MethodMeta::public());
        assert!(AccessPolicy::default().check(&free, None, None).is_ok());
        let policy = AccessPolicy {
            allow_non_service_static: false,
            ..AccessPolicy::default()
        };
        assert_eq!(
            policy.check(&free, None, None).unwrap_err(),
            "static methods on non-service types are not allowed"
        );

        let on_service = entry(MethodSignature::static_on::<Vault>("count"), MethodMeta::public());
        assert!(policy.check(&on_service, Some(&vault_service()), None).is_ok());

        let no_static = AccessPolicy {
            allow_static: false,
            ..AccessPolicy::permissive()
        };
        assert_eq!(
            no_static.check(&on_service, Some(&vault_service()), None).unwrap_err(),
            "static methods are not allowed"
        );
    }

    #[test]
    fn special_and_marker_rules() {
        let special = entry(MethodSignature::static_on::<Vault>("get_len"), MethodMeta::public().special());
        assert_eq!(
            AccessPolicy::default().check(&special, Some(&vault_service()), None).unwrap_err(),
            "special methods are not allowed"
        );

        let strict = AccessPolicy {
            require_callable_marker: true,
            ..AccessPolicy::default()
        };
        let plain = entry(MethodSignature::static_on::<Vault>("a"), MethodMeta::public());
        let marked = entry(MethodSignature::static_on::<Vault>("b"), MethodMeta::public().callable());
        assert_eq!(
            strict.check(&plain, Some(&vault_service()), None).unwrap_err(),
            "method is not marked callable"
        );
        assert!(strict.check(&marked, Some(&vault_service()), None).is_ok());
    }
}
