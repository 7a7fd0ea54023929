//! `admintools.conf` content: the built-in template, the in-image template
//! search, and the validity check the container's admin tooling depends on.

use std::collections::{HashMap, HashSet};

pub const ADMIN_CONFIG_FILE: &str = "admintools.conf";

/// Minimal single-node configuration used when no template can be read from
/// the image.
pub const DEFAULT_ADMIN_CONFIG: &str = "\
[Configuration]
    format = 3
    install_opts =
    default_base = /home/dbadmin
    controlmode = pt2pt
    controlsubnet = default
    spreadlog = False
    last_port = 5433
    tmp_dir = /tmp
    atdebug = False
    atgui_default_license = False
    unreachable_host_caching = True
    aws_metadata_conn_timeout = 2
    rebalance_shards_timeout = 36000
    database_state_change_poll_timeout = 21600
    wait_for_shutdown_timeout = 3600
    pexpect_verbose_logging = False
    sync_catalog_retries = 2000
    client_connect_timeout_sec = 5.0
    admintools_config_version = 110
    thread_timeout = 1200

[Cluster]
    hosts = 127.0.0.1

[Nodes]
    node0001 = 127.0.0.1

[SSHConfig]
    ssh_user =
    ssh_ident =
    ssh_options = -oConnectTimeout=30 -o TCPKeepAlive=no -o ServerAliveInterval=15 -o ServerAliveCountMax=2 -o StrictHostKeyChecking=no -o BatchMode=yes

[BootstrapParameters]
    awsendpoint = null
    awsregion = null
";

/// Locations the vendor image has shipped its template at across releases.
pub const TEMPLATE_SEARCH_PATHS: [&str; 5] = [
    "/opt/vertica/config/admintools.conf",
    "/opt/vertica/config/admintools/admintools.conf",
    "/opt/vertica/share/admintools/admintools.conf",
    "/opt/vertica/share/admintools.conf",
    "/opt/vertica/share/config/admintools.conf",
];

/// `sh -c` script printing the first template found among `"$@"`, falling
/// back to a bounded `find`.
pub const TEMPLATE_SEARCH_SCRIPT: &str = r#"for path in "$@"; do
  if [ -f "$path" ]; then
    cat "$path"
    exit 0
  fi
done
if command -v find >/dev/null 2>&1; then
  candidate=$(find /opt/vertica -maxdepth 6 -type f -name admintools.conf 2>/dev/null | head -n 1)
  if [ -n "$candidate" ]; then
    cat "$candidate"
    exit 0
  fi
fi
exit 1"#;

/// Parsed INI document: section name to lowercased option keys and values.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct IniDocument {
    sections: HashMap<String, HashMap<String, String>>,
}

impl IniDocument {
    pub fn get(&self, section: &str, option: &str) -> Option<&str> {
        self.sections
            .get(section)?
            .get(&option.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn has_option(&self, section: &str, option: &str) -> bool {
        self.get(section, option).is_some()
    }
}

/// Parse INI text with the same strictness the vendor tooling applies:
/// duplicate sections or options, options before any section, and lines
/// that are neither are all errors.
pub fn parse_ini(text: &str) -> Result<IniDocument, String> {
    let mut doc = IniDocument::default();
    let mut seen_sections = HashSet::new();
    let mut current: Option<String> = None;
    let mut last_option: Option<(String, usize)> = None;

    for (lineno, raw) in text.lines().enumerate() {
        let lineno = lineno + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            last_option = None;
            continue;
        }
        if trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }
        let indent = raw.len() - raw.trim_start().len();

        if let (Some(section), Some((option, option_indent))) = (&current, &last_option) {
            if indent > *option_indent {
                if let Some(value) = doc
                    .sections
                    .get_mut(section)
                    .and_then(|opts| opts.get_mut(option))
                {
                    value.push('\n');
                    value.push_str(trimmed);
                }
                continue;
            }
        }

        if let Some(name) = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            let name = name.to_string();
            if !seen_sections.insert(name.clone()) {
                return Err(format!("line {}: duplicate section [{}]", lineno, name));
            }
            doc.sections.insert(name.clone(), HashMap::new());
            current = Some(name);
            last_option = None;
            continue;
        }

        let Some(section) = &current else {
            return Err(format!("line {}: option outside of any section", lineno));
        };

        let split = trimmed.find(['=', ':']);
        let (key, value) = match split {
            Some(idx) => (trimmed[..idx].trim(), trimmed[idx + 1..].trim()),
            None => return Err(format!("line {}: expected 'key = value'", lineno)),
        };
        if key.is_empty() {
            return Err(format!("line {}: empty option name", lineno));
        }

        let key = key.to_ascii_lowercase();
        let options = doc.sections.entry(section.clone()).or_default();
        if options.insert(key.clone(), value.to_string()).is_some() {
            return Err(format!(
                "line {}: duplicate option '{}' in [{}]",
                lineno, key, section
            ));
        }
        last_option = Some((key, indent));
    }

    Ok(doc)
}

/// A usable admin config parses and names the cluster hosts and the first
/// node.
pub fn is_valid_admin_config(text: &str) -> bool {
    match parse_ini(text) {
        Ok(doc) => doc.has_option("Cluster", "hosts") && doc.has_option("Nodes", "node0001"),
        Err(e) => {
            tracing::debug!("admintools.conf does not parse: {}", e);
            false
        }
    }
}
