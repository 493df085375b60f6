// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Turning database flags or a connection URI into connection settings.

use crate::arguments;
use crate::error::ConfigurationError;
use crate::paths::Paths;
use crate::prompt::{required_prompt, Console};
use crate::settings::{self, SettingsPatch};
use camino::Utf8Path;
use percent_encoding::percent_decode_str;
use rand::distributions::Uniform;
use rand::Rng;
use std::borrow::Cow;
use std::collections::BTreeSet;
use url::{Host, Url};

/// Shorthand for the separately installed test database.
pub const TEST_DB_URI: &str = "maas-test-db:///";

const POSTGRES_SCHEME: &str = "postgres://";

pub const LOCAL_DATABASE_NAME: &str = "maasdb";
pub const LOCAL_DATABASE_USER: &str = "maas";
const LOCAL_PASSWORD_LENGTH: usize = 10;
const PASSWORD_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Where and as whom the region connects to its database.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseConnectionSpec {
    pub host: String,
    pub port: Option<u16>,
    pub name: String,
    pub user: String,
    pub pass: Option<String>,
}

impl DatabaseConnectionSpec {
    /// Connection to the database this host runs itself, reached through its
    /// socket directory, with a freshly generated password.
    pub fn local(paths: &Paths) -> Self {
        let mut rng = rand::thread_rng();
        let alphabet = Uniform::from(0..PASSWORD_ALPHABET.len());
        let pass = (0..LOCAL_PASSWORD_LENGTH)
            .map(|_| char::from(PASSWORD_ALPHABET[rng.sample(alphabet)]))
            .collect();
        Self {
            host: paths.db_sockets_dir().to_string(),
            port: None,
            name: LOCAL_DATABASE_NAME.to_string(),
            user: LOCAL_DATABASE_USER.to_string(),
            pass: Some(pass),
        }
    }

    /// Adds these settings to `patch`, removing optional ones that are unset
    /// so no stale value survives.
    pub fn add_to(&self, patch: &mut SettingsPatch) {
        patch.set(settings::DATABASE_HOST, self.host.as_str());
        patch.set_or_remove(settings::DATABASE_PORT, self.port);
        patch.set(settings::DATABASE_NAME, self.name.as_str());
        patch.set(settings::DATABASE_USER, self.user.as_str());
        patch.set_or_remove(settings::DATABASE_PASS, self.pass.as_deref());
    }
}

/// Database-related command-line input.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DatabaseOptions {
    pub uri: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub name: Option<String>,
    pub user: Option<String>,
    pub pass: Option<String>,
}

impl DatabaseOptions {
    pub fn uses_discrete_flags(&self) -> bool {
        self.host.is_some()
            || self.port.is_some()
            || self.name.is_some()
            || self.user.is_some()
            || self.pass.is_some()
    }
}

/// Resolves [`DatabaseOptions`] into exactly one [`DatabaseConnectionSpec`],
/// prompting for whatever is missing.
pub struct DatabaseUriResolver<'a> {
    console: &'a dyn Console,
    test_db_socket: camino::Utf8PathBuf,
}

impl<'a> DatabaseUriResolver<'a> {
    pub fn new(console: &'a dyn Console, paths: &Paths) -> Self {
        Self { console, test_db_socket: paths.test_db_socket() }
    }

    pub fn resolve(
        &self,
        options: &DatabaseOptions,
    ) -> Result<DatabaseConnectionSpec, ConfigurationError> {
        if options.uses_discrete_flags() {
            if options.uri.is_some() {
                return Err(ConfigurationError::ConflictingDatabaseOptions);
            }
            return self.resolve_discrete(options);
        }

        let uri = match &options.uri {
            Some(uri) => uri.clone(),
            None => {
                let default = self
                    .test_db_socket
                    .exists()
                    .then_some(TEST_DB_URI);
                required_prompt(
                    self.console,
                    "Database URI",
                    arguments::help(arguments::DATABASE_URI),
                    default,
                )?
            }
        };
        parse_database_uri(&uri, &self.test_db_socket)
    }

    fn resolve_discrete(
        &self,
        options: &DatabaseOptions,
    ) -> Result<DatabaseConnectionSpec, ConfigurationError> {
        self.console.eprint(
            "\nWARNING: Passing individual database configs is deprecated \
             and will be removed in a future release.\n\
             Please use --database-uri instead.\n",
        );
        let ask = |given: &Option<String>, title: &str, flag: &str| {
            match given.as_deref().filter(|v| !v.is_empty()) {
                Some(value) => Ok(value.to_string()),
                None => required_prompt(
                    self.console,
                    title,
                    arguments::help(flag),
                    None,
                ),
            }
        };
        Ok(DatabaseConnectionSpec {
            host: ask(&options.host, "Database host", arguments::DATABASE_HOST)?,
            port: options.port,
            name: ask(&options.name, "Database name", arguments::DATABASE_NAME)?,
            user: ask(&options.user, "Database user", arguments::DATABASE_USER)?,
            pass: Some(ask(
                &options.pass,
                "Database password",
                arguments::DATABASE_PASS,
            )?),
        })
    }
}

fn decode(component: &str) -> Result<String, ConfigurationError> {
    percent_decode_str(component)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| {
            ConfigurationError::InvalidUri(format!(
                "invalid percent-encoding in {component:?}"
            ))
        })
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

/// Puts `localhost` where a URI with credentials or a port names no host,
/// which `Url` cannot represent.
fn fill_empty_host(uri: &str) -> Cow<'_, str> {
    let Some(rest) = uri.strip_prefix(POSTGRES_SCHEME) else {
        return Cow::Borrowed(uri);
    };
    let authority_len = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let authority = &rest[..authority_len];
    let host_start = authority.rfind('@').map_or(0, |at| at + 1);
    let host_and_port = &authority[host_start..];
    let has_userinfo = host_start > 0;
    if host_and_port.starts_with(':')
        || (has_userinfo && host_and_port.is_empty())
    {
        let at = POSTGRES_SCHEME.len() + host_start;
        Cow::Owned(format!("{}localhost{}", &uri[..at], &uri[at..]))
    } else {
        Cow::Borrowed(uri)
    }
}

/// Splits a query string into percent-decoded pairs. Unlike form decoding,
/// `+` is kept as is.
fn query_pairs(
    query: &str,
) -> Result<Vec<(String, String)>, ConfigurationError> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            Ok((decode(key)?, decode(value)?))
        })
        .collect()
}

/// Parses a `postgres://` URI, or the test database shorthand, into
/// connection settings.
///
/// Only the `user`, `password`, `host`, `dbname` and `port` query parameters
/// are accepted, and they override the corresponding URI components. A missing
/// host means `localhost` and a missing database name means the user's name.
pub fn parse_database_uri(
    uri: &str,
    test_db_socket: &Utf8Path,
) -> Result<DatabaseConnectionSpec, ConfigurationError> {
    let uri = if uri == TEST_DB_URI {
        format!("postgres:///{LOCAL_DATABASE_NAME}?host={test_db_socket}&user={LOCAL_DATABASE_USER}")
    } else if uri.starts_with(POSTGRES_SCHEME) {
        uri.to_string()
    } else {
        return Err(ConfigurationError::UnsupportedScheme);
    };

    let parsed = Url::parse(&fill_empty_host(&uri))
        .map_err(|err| ConfigurationError::InvalidUri(err.to_string()))?;

    let mut user = non_empty(decode(parsed.username())?);
    let mut pass = match parsed.password() {
        Some(pass) => Some(decode(pass)?),
        None => None,
    };
    let mut host = match parsed.host() {
        Some(Host::Domain(domain)) => non_empty(decode(domain)?),
        Some(Host::Ipv4(ip)) => Some(ip.to_string()),
        Some(Host::Ipv6(ip)) => Some(ip.to_string()),
        None => None,
    };
    let mut port = parsed.port();
    let mut name = non_empty(decode(parsed.path().trim_start_matches('/'))?);

    let mut unsupported = BTreeSet::new();
    for (key, value) in query_pairs(parsed.query().unwrap_or_default())? {
        match key.as_str() {
            "user" => user = non_empty(value),
            "password" => pass = Some(value),
            "host" => host = non_empty(value),
            "dbname" => name = non_empty(value),
            "port" => {
                port = Some(value.parse().map_err(|_| {
                    ConfigurationError::InvalidUri(format!(
                        "invalid port: {value:?}"
                    ))
                })?)
            }
            other => {
                unsupported.insert(other.to_string());
            }
        }
    }
    if !unsupported.is_empty() {
        return Err(ConfigurationError::UnsupportedParameters(
            unsupported.into_iter().collect(),
        ));
    }

    let user =
        user.ok_or_else(|| ConfigurationError::MissingUser(uri.clone()))?;
    Ok(DatabaseConnectionSpec {
        host: host.unwrap_or_else(|| "localhost".to_string()),
        port,
        name: name.unwrap_or_else(|| user.clone()),
        user,
        pass,
    })
}
