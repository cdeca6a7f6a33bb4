//! Static mapping of each supported CWE to the Bandit test identifiers
//! and Semgrep rules that detect it in Python code.

/// Every CWE class the experiment can elicit.
pub const SUPPORTED_CWES: [&str; 17] = [
    "022", "078", "079", "095", "113", "117", "326", "327", "329", "347", "377", "502", "643",
    "760", "918", "943", "1333",
];

pub fn is_supported(cwe: &str) -> bool {
    SUPPORTED_CWES.contains(&cwe)
}

/// Comma-joined Bandit `-t` test list, or None when Bandit has no
/// coverage for this CWE.
pub fn bandit_tests(cwe: &str) -> Option<&'static str> {
    let tests = match cwe {
        "022" => "B202",
        "078" => "B102,B601,B602,B603,B604,B605,B606,B607,B609",
        "079" => "B701,B702,B703,B704",
        "095" => "B102,B307",
        "326" => "B505",
        "327" => "B304,B305,B324,B413,B502,B503,B504,B508,B509",
        "377" => "B108,B306",
        "502" => "B301,B302,B403,B506,B614",
        "643" => "B313,B314,B315,B316,B317,B318,B319",
        "760" => "B324",
        "918" => "B310",
        "943" => "B608,B610,B611",
        _ => return None,
    };
    Some(tests)
}

/// Semgrep `--config` values for this CWE: the local rule file plus any
/// registry rules (`r/`-prefixed).
pub fn semgrep_configs(cwe: &str) -> Vec<&'static str> {
    let joined = match cwe {
        "022" => "config/semgrep_rules.yaml,r/python.lang.security.audit.path-traversal.path-traversal-join,r/python.lang.security.audit.path-traversal.path-traversal-open",
        "078" => "config/semgrep_rules.yaml,r/python.lang.security.audit.subprocess-shell-true.subprocess-shell-true,r/python.lang.security.audit.os-system.os-system,r/python.lang.security.audit.os-popen.os-popen",
        "079" => "config/semgrep_rules.yaml,r/python.flask.security.audit.directly-returned-format-string.directly-returned-format-string,r/python.django.security.injection.raw-html-format.raw-html-format",
        "095" => "config/semgrep_rules.yaml,r/python.lang.security.audit.eval-detected.eval-detected",
        "113" => "config/semgrep_rules.yaml",
        "117" => "config/semgrep_rules.yaml",
        "326" => "config/semgrep_rules.yaml,r/python.pycryptodome.security.insufficient-rsa-key-size.insufficient-rsa-key-size",
        "327" => "config/semgrep_rules.yaml,r/python.lang.security.insecure-hash-algorithms-md5.insecure-hash-algorithm-md5",
        "329" => "config/semgrep_rules.yaml,r/python.cryptography.security.insecure-cipher-modes.insecure-cipher-modes",
        "347" => "config/semgrep_rules.yaml,r/python.jwt.security.jwt-none-alg.jwt-none-alg",
        "377" => "config/semgrep_rules.yaml,r/python.lang.security.audit.tempfile.mktemp-usage",
        "502" => "config/semgrep_rules.yaml,r/python.lang.security.deserialization.pickle.avoid-pickle",
        "643" => "config/semgrep_rules.yaml,r/python.lang.security.audit.lxml.xpath-injection",
        "760" => "config/semgrep_rules.yaml",
        "918" => "config/semgrep_rules.yaml,r/python.flask.security.injection.ssrf-requests.ssrf-requests,r/python.django.security.injection.ssrf.ssrf-injection-requests.ssrf-injection-requests",
        "943" => "config/semgrep_rules.yaml,r/python.sqlalchemy.security.sqlalchemy-sql-injection.sqlalchemy-sql-injection,r/python.django.security.injection.sql.sql-injection,r/python.lang.security.audit.sqli.sql-injection-user-input",
        "1333" => "config/semgrep_rules.yaml",
        _ => return Vec::new(),
    };
    joined.split(',').collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_supported_cwe_has_semgrep_rules() {
        for cwe in SUPPORTED_CWES {
            assert!(!semgrep_configs(cwe).is_empty(), "no semgrep rules for {}", cwe);
        }
    }

    #[test]
    fn test_bandit_coverage_gaps() {
        // Bandit has no tests for these classes; only Semgrep runs.
        for cwe in ["113", "117", "329", "347", "1333"] {
            assert!(bandit_tests(cwe).is_none(), "{} unexpectedly has bandit tests", cwe);
        }
        assert_eq!(bandit_tests("327").unwrap().split(',').count(), 9);
    }

    #[test]
    fn test_unsupported_cwe() {
        assert!(!is_supported("089"));
        assert!(bandit_tests("089").is_none());
        assert!(semgrep_configs("089").is_empty());
    }
}
