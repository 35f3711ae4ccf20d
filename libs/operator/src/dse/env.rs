//! Environment assembly for the application container: user-declared `env`
//! entries plus one injected connection-URL variable (and any supplementary
//! variables) per declared dependency. Per spec §4.A/§8, a user-declared
//! name always wins over an injected one of the same name — dependency
//! injection never shadows an explicit override.

use crate::crd::dse::{DependencySpec, EnvEntry};
use crate::registry::{ConnectionContext, DependencyRegistry};

/// Builds the full environment for the application container.
///
/// Order: user-declared entries first, then one entry per dependency (its
/// primary connection-URL variable, then any extra variables it defines),
/// skipping any dependency-sourced name already present from the user or
/// from an earlier dependency in `dependencies`.
pub fn build_env(
    registry: &DependencyRegistry,
    dse_name: &str,
    user_env: &[EnvEntry],
    dependencies: &[DependencySpec],
) -> Vec<EnvEntry> {
    let mut seen: std::collections::HashSet<String> =
        user_env.iter().map(|e| e.name.clone()).collect();
    let mut env = user_env.to_vec();

    for dep in dependencies {
        let entry = registry.entry(dep.kind);
        let port = dep.port.unwrap_or(entry.default_port);
        let credentials = registry.effective_credentials(dep.kind, dep.env.as_deref().unwrap_or(&[]));
        let ctx = ConnectionContext {
            dse_name,
            kind: dep.kind,
            port,
            credentials: &credentials,
        };

        let var_name = dep
            .env_var_name
            .clone()
            .unwrap_or_else(|| entry.default_env_var_name.to_owned());
        if seen.insert(var_name.clone()) {
            env.push(EnvEntry {
                name: var_name,
                value: registry.connection_url(&ctx),
            });
        }

        for extra in registry.extra_env(&ctx) {
            if seen.insert(extra.name.clone()) {
                env.push(extra);
            }
        }
    }

    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::dse::DependencyKind;

    #[test]
    fn user_entry_shadows_dependency_injected_name() {
        let registry = DependencyRegistry::new();
        let user_env = vec![EnvEntry {
            name: "DATABASE_URL".into(),
            value: "postgres://overridden".into(),
        }];
        let deps = vec![DependencySpec {
            kind: DependencyKind::Postgres,
            version: None,
            image: None,
            port: None,
            env_var_name: None,
            storage_size: None,
            env: None,
            resources: None,
        }];
        let env = build_env(&registry, "myapp", &user_env, &deps);
        let database_url_entries: Vec<_> = env.iter().filter(|e| e.name == "DATABASE_URL").collect();
        assert_eq!(database_url_entries.len(), 1);
        assert_eq!(database_url_entries[0].value, "postgres://overridden");
    }

    #[test]
    fn multiple_dependencies_each_inject_their_own_variable() {
        let registry = DependencyRegistry::new();
        let deps = vec![
            DependencySpec {
                kind: DependencyKind::Postgres,
                version: None,
                image: None,
                port: None,
                env_var_name: None,
                storage_size: None,
                env: None,
                resources: None,
            },
            DependencySpec {
                kind: DependencyKind::Redis,
                version: None,
                image: None,
                port: None,
                env_var_name: None,
                storage_size: None,
                env: None,
                resources: None,
            },
        ];
        let env = build_env(&registry, "myapp", &[], &deps);
        assert!(env.iter().any(|e| e.name == "DATABASE_URL"));
        assert!(env.iter().any(|e| e.name == "REDIS_URL"));
    }

    #[test]
    fn custom_env_var_name_override_is_honored() {
        let registry = DependencyRegistry::new();
        let deps = vec![DependencySpec {
            kind: DependencyKind::Postgres,
            version: None,
            image: None,
            port: None,
            env_var_name: Some("PRIMARY_DB_URL".into()),
            storage_size: None,
            env: None,
            resources: None,
        }];
        let env = build_env(&registry, "myapp", &[], &deps);
        assert!(env.iter().any(|e| e.name == "PRIMARY_DB_URL"));
        assert!(!env.iter().any(|e| e.name == "DATABASE_URL"));
    }
}
