use super::*;

// =============================================================================
// table shape
// =============================================================================

#[test]
fn table_has_expected_routes() {
    let paths: Vec<&str> = app_routes().iter().map(|r| r.path).collect();
    assert_eq!(paths, vec!["/", "/login", "/admin", "/manager", "/employee"]);
}

#[test]
fn root_forwards_to_login() {
    let root = find_route("/").unwrap();
    assert_eq!(root.redirect_to, Some("/login"));
    assert_eq!(root.rules, RouteRules::NONE);
}

#[test]
fn login_is_guest_only() {
    let login = find_route("/login").unwrap();
    assert!(login.rules.requires_guest);
    assert!(!login.rules.requires_auth);
    assert_eq!(login.rules.requires_role, None);
    assert_eq!(login.redirect_to, None);
}

#[test]
fn role_routes_require_auth_and_their_role() {
    for (path, role) in [("/admin", Role::Admin), ("/manager", Role::Manager), ("/employee", Role::Employee)] {
        let route = find_route(path).unwrap();
        assert!(route.rules.requires_auth, "{path} must require auth");
        assert!(!route.rules.requires_guest);
        assert_eq!(route.rules.requires_role, Some(role));
    }
}

// =============================================================================
// lookup
// =============================================================================

#[test]
fn unknown_path_has_no_route() {
    assert!(find_route("/missing").is_none());
    assert!(find_route("").is_none());
}

#[test]
fn lookup_is_exact_not_prefix() {
    assert!(find_route("/admin/settings").is_none());
}

// =============================================================================
// rule constructors
// =============================================================================

#[test]
fn rule_constructors_never_conflict() {
    for rules in [RouteRules::NONE, RouteRules::auth(), RouteRules::guest(), RouteRules::role(Role::Admin)] {
        assert!(!(rules.requires_auth && rules.requires_guest));
    }
}

#[test]
fn default_rules_are_unrestricted() {
    assert_eq!(RouteRules::default(), RouteRules::NONE);
}
