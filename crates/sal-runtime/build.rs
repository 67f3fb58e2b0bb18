//! Build script for sal-runtime
//!
//! Produces the compile-time defaults:
//! 1. Start with library defaults
//! 2. If SAL_CONFIG_RS env var is set, parse that file
//! 3. Merge user values over defaults (user wins)
//! 4. Generate OUT_DIR/sal_merged_config.rs
//!
//! The user file only needs the values it changes, as
//! `pub const NAME: TYPE = VALUE;` lines.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

struct ConfigParam {
    name: &'static str,
    rust_type: &'static str,
    default_value: &'static str,
}

const CONFIG_PARAMS: &[ConfigParam] = &[
    ConfigParam {
        name: "NUM_SOCKETS",
        rust_type: "usize",
        default_value: "16",
    },
    ConfigParam {
        name: "NUM_EVENTS",
        rust_type: "usize",
        default_value: "16",
    },
    ConfigParam {
        name: "SOCKET_BASE",
        rust_type: "i32",
        default_value: "3",
    },
    ConfigParam {
        name: "MAX_PAYLOAD",
        rust_type: "usize",
        default_value: "1512",
    },
    ConfigParam {
        name: "RECV_POLL_MS",
        rust_type: "u64",
        default_value: "20",
    },
    ConfigParam {
        name: "DNS_MAX_NAME_LEN",
        rust_type: "usize",
        default_value: "256",
    },
    ConfigParam {
        name: "SEM_PER_THREAD",
        rust_type: "bool",
        default_value: "true",
    },
];

fn main() {
    let out_dir = env::var("OUT_DIR").expect("OUT_DIR not set");
    let dest_path = Path::new(&out_dir).join("sal_merged_config.rs");

    let mut config: HashMap<&'static str, String> = CONFIG_PARAMS
        .iter()
        .map(|p| (p.name, p.default_value.to_string()))
        .collect();

    let user_path = env::var("SAL_CONFIG_RS").ok();
    if let Some(path) = &user_path {
        println!("cargo:rerun-if-changed={}", path);

        match fs::read_to_string(path) {
            Ok(content) => {
                for unknown in parse_and_merge(&content, &mut config) {
                    println!("cargo:warning=Unknown SAL config parameter: {}", unknown);
                }
                println!("cargo:warning=Using custom SAL config: {}", path);
            }
            Err(e) => {
                println!("cargo:warning=Failed to read SAL_CONFIG_RS ({}): {}", path, e);
            }
        }
    }

    println!("cargo:rerun-if-env-changed=SAL_CONFIG_RS");
    println!("cargo:rerun-if-changed=build.rs");

    let output = generate_config(&config, user_path.as_deref());
    fs::write(&dest_path, output).expect("Failed to write merged config");
}

/// Merge recognised `pub const` lines into `config`, returning unknown names
fn parse_and_merge(content: &str, config: &mut HashMap<&'static str, String>) -> Vec<String> {
    let mut unknown = Vec::new();

    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with("//") {
            continue;
        }
        let Some((name, value)) = parse_const_line(line) else {
            continue;
        };
        match CONFIG_PARAMS.iter().find(|p| p.name == name) {
            Some(param) => {
                config.insert(param.name, value);
            }
            None => unknown.push(name),
        }
    }

    unknown
}

/// Parse `pub const NAME: TYPE = VALUE;` into (NAME, VALUE)
fn parse_const_line(line: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix("pub const ")?.trim();

    let colon_pos = rest.find(':')?;
    let name = rest[..colon_pos].trim().to_string();

    let eq_pos = rest.find('=')?;
    let semi_pos = rest.rfind(';').unwrap_or(rest.len());
    if semi_pos <= eq_pos {
        return None;
    }
    let value = rest[eq_pos + 1..semi_pos].trim().to_string();
    if value.is_empty() {
        return None;
    }

    Some((name, value))
}

fn generate_config(config: &HashMap<&'static str, String>, user_path: Option<&str>) -> String {
    let mut output = String::new();

    output.push_str("// Auto-generated by build.rs - do not edit\n");
    match user_path {
        Some(path) => output.push_str(&format!("// Library defaults merged with {}\n\n", path)),
        None => output.push_str("// Library defaults\n\n"),
    }

    for param in CONFIG_PARAMS {
        let value = config
            .get(param.name)
            .map(String::as_str)
            .unwrap_or(param.default_value);
        output.push_str(&format!(
            "pub const {}: {} = {};\n",
            param.name, param.rust_type, value
        ));
    }

    output
}
