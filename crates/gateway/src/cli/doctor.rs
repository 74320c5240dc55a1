//! `verse-server doctor` — sanity-check config and the bootstrap path
//! without starting the dispatcher, catching fatal conditions ahead of
//! time: a bad auth backend or an unbuildable system-node skeleton.

use verse_domain::config::{AuthBackend as AuthBackendConfig, Config, ConfigSeverity};
use verse_domain::user::UserDirectory;

use crate::auth::csv::CsvAuthBackend;
use crate::auth::AuthBackend;

/// Run every check and print a summary. Returns `true` iff everything
/// passed.
pub fn run(config: &Config, config_path: &str) -> bool {
    println!("verse-server doctor");
    println!("====================\n");

    let mut all_passed = true;

    check_config_file(config_path, &mut all_passed);
    check_config_validation(config, &mut all_passed);
    let directory = check_auth_backend(config, &mut all_passed);
    check_bootstrap(&directory, &mut all_passed);
    check_persistence(config, &mut all_passed);

    println!();
    if all_passed {
        println!("all checks passed.");
    } else {
        println!("some checks failed. review the output above.");
    }

    all_passed
}

fn print_check(name: &str, passed: bool, detail: String) {
    let status = if passed { "PASS" } else { "FAIL" };
    println!("  [{status}] {name}: {detail}");
}

fn check_config_file(config_path: &str, all_passed: &mut bool) {
    let exists = std::path::Path::new(config_path).exists();
    print_check(
        "config file exists",
        exists,
        if exists {
            config_path.to_owned()
        } else {
            format!("{config_path} not found (using defaults)")
        },
    );
    // Missing config is not fatal -- defaults are a legitimate server.
}

fn check_config_validation(config: &Config, all_passed: &mut bool) {
    let issues = config.validate();
    let error_count = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();

    if issues.is_empty() {
        print_check("config validation", true, "no issues".into());
        return;
    }

    print_check(
        "config validation",
        error_count == 0,
        format!("{} issue(s) ({error_count} error(s))", issues.len()),
    );
    for issue in &issues {
        println!("      {issue}");
    }
    if error_count > 0 {
        *all_passed = false;
    }
}

fn check_auth_backend(config: &Config, all_passed: &mut bool) -> verse_domain::user::StaticUserDirectory {
    match &config.auth.backend {
        AuthBackendConfig::Csv { path } => match CsvAuthBackend::load(path) {
            Ok(backend) => {
                let directory = backend.directory();
                print_check(
                    "auth backend (csv)",
                    true,
                    format!("{} account(s) from {}", directory.all().len(), path.display()),
                );
                directory
            }
            Err(e) => {
                print_check("auth backend (csv)", false, e.to_string());
                *all_passed = false;
                verse_domain::user::StaticUserDirectory::default()
            }
        },
        AuthBackendConfig::Static => {
            print_check("auth backend (static)", true, "fixed test directory".into());
            verse_domain::user::StaticUserDirectory::default()
        }
    }
}

fn check_bootstrap(directory: &verse_domain::user::StaticUserDirectory, all_passed: &mut bool) {
    let store = verse_core::node::NodeStore::new();
    let outcome = verse_core::bootstrap::bootstrap(&store, &directory.all());

    let skeleton_ok = [
        verse_domain::ids::NodeId::ROOT,
        verse_domain::ids::NodeId::AVATAR_PARENT,
        verse_domain::ids::NodeId::USER_PARENT,
        verse_domain::ids::NodeId::SCENE_PARENT,
    ]
    .iter()
    .all(|id| store.nodes.contains(*id));

    print_check(
        "bootstrap (system skeleton + user nodes)",
        skeleton_ok,
        format!("{} user node(s) attached", outcome.users_attached),
    );
    if !skeleton_ok {
        *all_passed = false;
    }
}

fn check_persistence(config: &Config, all_passed: &mut bool) {
    if !config.persistence.enabled {
        print_check("persistence", true, "disabled".into());
        return;
    }
    let ok = !config.persistence.connection_string.is_empty();
    print_check(
        "persistence",
        ok,
        if ok {
            config.persistence.connection_string.clone()
        } else {
            "enabled but connection_string is empty".into()
        },
    );
    if !ok {
        *all_passed = false;
    }
}
