//! Pre-handler client-IP gate.
//!
//! Deny-list hits are rejected first, then allow-list hits pass, then the
//! default action applies. Requests with no resolvable address (Unix peers)
//! follow the default action.

use trellis_core::{
    config::{IpAction, IpFilterOptions},
    http::HttpError,
};

use crate::{
    http::Ctx,
    middleware::{Middleware, MwFuture, Next},
};

pub struct IpFilter {
    options: IpFilterOptions,
}

impl IpFilter {
    pub fn new(options: IpFilterOptions) -> Self {
        IpFilter { options }
    }

    fn permits(&self, ip: Option<std::net::IpAddr>) -> bool {
        let Some(ip) = ip else {
            return self.options.default_action == IpAction::Allow;
        };
        if self.options.deny.iter().any(|net| net.contains(&ip)) {
            return false;
        }
        if self.options.allow.iter().any(|net| net.contains(&ip)) {
            return true;
        }
        self.options.default_action == IpAction::Allow
    }
}

impl Middleware for IpFilter {
    fn handle(&self, ctx: Ctx, next: Next) -> MwFuture {
        let permitted = self.permits(ctx.request().client_ip());
        Box::pin(async move {
            if !permitted {
                return Err(HttpError::Forbidden("address not allowed".into()));
            }
            next.run(ctx).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::config::Value;

    fn filter(toml: &str) -> IpFilter {
        let value = Value::from_slice(toml.as_bytes()).unwrap();
        let security =
            trellis_core::config::SecurityOptions::from_value(value.get("security"), true).unwrap();
        IpFilter::new(security.ip_filter)
    }

    #[test]
    fn test_deny_list_wins_over_allow() {
        let filter = filter(
            r#"
            [security.ip_filter]
            enabled = true
            default_action = "allow"
            allow = ["192.0.2.0/24"]
            deny = ["192.0.2.66"]
            "#,
        );
        assert!(filter.permits(Some("192.0.2.10".parse().unwrap())));
        assert!(!filter.permits(Some("192.0.2.66".parse().unwrap())));
        assert!(filter.permits(Some("198.51.100.1".parse().unwrap())));
    }

    #[test]
    fn test_default_deny_with_allow_list() {
        let filter = filter(
            r#"
            [security.ip_filter]
            enabled = true
            default_action = "deny"
            allow = ["10.0.0.0/8"]
            "#,
        );
        assert!(filter.permits(Some("10.1.2.3".parse().unwrap())));
        assert!(!filter.permits(Some("192.0.2.1".parse().unwrap())));
        assert!(!filter.permits(None));
    }
}
