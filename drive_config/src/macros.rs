/// Creates a configuration value group struct.
///
/// Usage:
/// ```ignore
/// drive_config::config_group!("DOWNLOAD" => {
///     /// How many block fetches may run at once.
///     ref max_concurrent_fetches: usize = 6;
/// });
/// ```
///
/// This expands to a `ConfigValues` struct with the listed fields, a
/// `Default` impl holding the written defaults, and an
/// `apply_env_overrides` method that reads `DRIVE_{GROUP}_{FIELD}`
/// environment variables, e.g. `DRIVE_DOWNLOAD_MAX_CONCURRENT_FETCHES`.
/// Unparsable overrides are logged and ignored rather than failing startup.
#[macro_export]
macro_rules! config_group {
    ($group:literal => {
        $(
            $(#[$meta:meta])*
            ref $name:ident : $ty:ty = $default:expr;
        )+
    }) => {
        #[derive(Debug, Clone)]
        pub struct ConfigValues {
            $(
                $(#[$meta])*
                pub $name: $ty,
            )+
        }

        impl Default for ConfigValues {
            fn default() -> Self {
                Self {
                    $(
                        $name: {
                            let v: $ty = $default;
                            v
                        },
                    )+
                }
            }
        }

        impl AsRef<ConfigValues> for ConfigValues {
            fn as_ref(&self) -> &ConfigValues {
                self
            }
        }

        impl ConfigValues {
            pub fn new() -> Self {
                Self::default()
            }

            /// Apply `DRIVE_{GROUP}_{FIELD}` environment overrides to this group.
            pub fn apply_env_overrides(&mut self) {
                $(
                    {
                        let var = format!("DRIVE_{}_{}", $group, stringify!($name).to_ascii_uppercase());
                        if let Ok(raw) = std::env::var(&var) {
                            match <$ty as $crate::EnvConfigValue>::parse_env(&raw) {
                                Ok(v) => self.$name = v,
                                Err(e) => {
                                    tracing::warn!(var = %var, error = %e, "Ignoring unparsable config override");
                                },
                            }
                        }
                    }
                )+
            }
        }
    };
}
