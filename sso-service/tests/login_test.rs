mod common;

use common::{ctx, local_user, password, Harness, LOGIN_HOST};
use secrecy::Secret;
use sso_service::clock::Clock;
use sso_service::models::{
    AuthLevel, DirectoryDescriptor, Origin, ShadowAccountPolicy, User, UserHandle,
};
use sso_service::services::{MockDirectory, ServiceError, Stage2Input, Stage2Outcome};
use sso_service::utils::totp;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const ALICE_PHONE: &str = "+15550001111";
const CAROL_PHONE: &str = "+15550002222";

fn with_phone(mut user: User, phone: &str) -> User {
    user.phone_number = Some(phone.to_string());
    user
}

fn with_totp(mut user: User) -> (User, String) {
    let secret = totp::generate_secret();
    user.totp_secret = Some(secret.clone());
    user.totp_enabled = true;
    user.totp_enrolled = true;
    (user, secret)
}

fn poll() -> Stage2Input {
    Stage2Input::default()
}

fn totp_input(code: &str) -> Stage2Input {
    Stage2Input {
        totp: Some(code.to_string()),
        ..Default::default()
    }
}

fn callback_input(code: &str) -> Stage2Input {
    Stage2Input {
        code: Some(code.to_string()),
        ..Default::default()
    }
}

fn corp_directory(policy: ShadowAccountPolicy) -> DirectoryDescriptor {
    DirectoryDescriptor {
        name: "corp".to_string(),
        host: "ldap.corp.example.com".to_string(),
        port: 389,
        bind_dn: "cn=sso,ou=services,dc=corp".to_string(),
        base_dn: "ou=people,dc=corp".to_string(),
        bind_password: Some(Secret::new("bind-secret".to_string())),
        shadow_policy: policy,
    }
}

#[tokio::test]
async fn test_wrong_password_leaves_session_untouched() {
    let h = Harness::new();
    h.users.insert(local_user("alice", "correct horse"));
    let anonymous = h.sessions.create(UserHandle::new(User::anonymous()));

    let err = h
        .flow
        .stage1(Some(anonymous.id()), "alice", password("wrong"), &ctx())
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::InvalidCredentials));
    assert_eq!(anonymous.auth_level(), AuthLevel::Anonymous);
    assert!(anonymous.user().read(User::is_anonymous));
    assert_eq!(h.sessions.len(), 1);
    assert_eq!(h.audit_texts(), vec!["log in failed with password"]);
}

#[tokio::test]
async fn test_unknown_user_is_reported_like_wrong_password() {
    let h = Harness::new();
    let err = h
        .flow
        .stage1(None, "nobody", password("whatever"), &ctx())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidCredentials));
    assert!(h.sessions.is_empty());
}

#[tokio::test]
async fn test_disabled_local_account_is_refused() {
    let h = Harness::new();
    let mut user = local_user("alice", "pw");
    user.enabled = false;
    h.users.insert(user);

    let err = h.flow.stage1(None, "alice", password("pw"), &ctx()).await.unwrap_err();
    assert!(matches!(err, ServiceError::DisabledAccount));
    assert!(h.sessions.is_empty());
}

#[tokio::test]
async fn test_password_step_reuses_anonymous_session() {
    let h = Harness::new();
    h.users.insert(local_user("alice", "pw"));
    let anonymous = h.sessions.create(UserHandle::new(User::anonymous()));

    let outcome = h
        .flow
        .stage1(Some(anonymous.id()), "Alice", password("pw"), &ctx())
        .await
        .unwrap();

    assert_eq!(outcome.session.id(), anonymous.id());
    assert_eq!(outcome.user.name, "alice");
    assert_eq!(outcome.user.auth_level(), AuthLevel::PreAuthenticated);
    assert_eq!(outcome.user.origin, Origin::Local);
    assert_eq!(outcome.redirect_uri, "https://users.corp.example.com");
    assert_eq!(anonymous.auth_level(), AuthLevel::PreAuthenticated);
}

#[tokio::test]
async fn test_second_password_login_gets_fresh_session() {
    let h = Harness::new();
    h.users.insert(local_user("alice", "pw"));
    h.users.insert(local_user("bob", "pw"));

    let first = h.login("alice", "pw").await;
    let outcome = h
        .flow
        .stage1(Some(&first), "bob", password("pw"), &ctx())
        .await
        .unwrap();

    assert_ne!(outcome.session.id(), first);
    assert!(h.sessions.retrieve(&first).is_none());
    assert_eq!(h.sessions.len(), 1);
}

#[tokio::test]
async fn test_supervised_user_cannot_use_totp() {
    let h = Harness::new();
    let (mut bob, secret) = with_totp(local_user("bob", "pw"));
    bob.set_supervisor(with_phone(User::new("carol"), CAROL_PHONE)).unwrap();
    h.users.insert(bob);

    let session = h.login("bob", "pw").await;
    let code = totp::current_code(&secret, h.clock.now()).unwrap();
    let err = h
        .flow
        .stage2(Some(&session), totp_input(&code), &ctx())
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::PolicyViolation(_)));
    let user = h.flow.me(Some(&session)).unwrap();
    assert_eq!(user.auth_level(), AuthLevel::PreAuthenticated);
}

#[tokio::test]
async fn test_totp_completes_login() {
    let h = Harness::new();
    let (alice, secret) = with_totp(local_user("alice", "pw"));
    h.users.insert(alice);
    let session = h.login("alice", "pw").await;

    let err = h
        .flow
        .stage2(Some(&session), totp_input("000000x"), &ctx())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidCredentials));
    assert_eq!(h.flow.me(Some(&session)).unwrap().auth_level(), AuthLevel::PreAuthenticated);

    let code = totp::current_code(&secret, h.clock.now()).unwrap();
    let outcome = h
        .flow
        .stage2(Some(&session), totp_input(&code), &ctx())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        Stage2Outcome::Authenticated {
            redirect_uri: "https://users.corp.example.com".to_string()
        }
    );
    assert_eq!(h.flow.me(Some(&session)).unwrap().auth_level(), AuthLevel::Authenticated);
    assert!(h.audit_texts().contains(&"log in success with totp".to_string()));
}

#[tokio::test]
async fn test_sms_resend_respects_cooldown() {
    let h = Harness::new();
    h.users.insert(with_phone(local_user("alice", "pw"), ALICE_PHONE));
    let session = h.login("alice", "pw").await;

    assert_eq!(
        h.flow.stage2(Some(&session), poll(), &ctx()).await.unwrap(),
        Stage2Outcome::Pending
    );

    h.advance(Duration::from_secs(30));
    let err = h.flow.stage2(Some(&session), poll(), &ctx()).await.unwrap_err();
    match err {
        ServiceError::RateLimited { retry_after } => {
            assert_eq!(retry_after, Duration::from_secs(30))
        }
        other => panic!("expected rate limit, got {:?}", other),
    }

    h.advance(Duration::from_secs(31));
    assert_eq!(
        h.flow.stage2(Some(&session), poll(), &ctx()).await.unwrap(),
        Stage2Outcome::Pending
    );
    assert_eq!(h.gateway.sent().len(), 2);
    assert!(h.gateway.sent().iter().all(|m| m.phone_number == ALICE_PHONE));
}

#[tokio::test]
async fn test_failed_send_does_not_start_cooldown() {
    let h = Harness::new();
    h.users.insert(with_phone(local_user("alice", "pw"), ALICE_PHONE));
    let session = h.login("alice", "pw").await;

    h.gateway.set_failing(true);
    let err = h.flow.stage2(Some(&session), poll(), &ctx()).await.unwrap_err();
    assert!(matches!(err, ServiceError::Dependency(_)));

    h.gateway.set_failing(false);
    assert_eq!(
        h.flow.stage2(Some(&session), poll(), &ctx()).await.unwrap(),
        Stage2Outcome::Pending
    );
}

#[tokio::test]
async fn test_approval_link_elevates_session_without_cookie() {
    let h = Harness::new();
    h.users.insert(with_phone(local_user("alice", "pw"), ALICE_PHONE));
    let session = h.login("alice", "pw").await;
    h.flow.stage2(Some(&session), poll(), &ctx()).await.unwrap();

    let sent = h.gateway.sent();
    assert!(sent[0].uri.starts_with(&format!("https://{}/v1/auth/stage/2?code=", LOGIN_HOST)));
    assert_eq!(sent[0].name, None);

    let code = h.gateway.last_code().unwrap();
    let outcome = h.flow.stage2(None, callback_input(&code), &ctx()).await.unwrap();
    assert_eq!(
        outcome,
        Stage2Outcome::Approved {
            user: "alice".to_string(),
            approver: None
        }
    );

    assert!(matches!(
        h.flow.stage2(Some(&session), poll(), &ctx()).await.unwrap(),
        Stage2Outcome::Authenticated { .. }
    ));

    // The code is spent.
    let err = h.flow.stage2(None, callback_input(&code), &ctx()).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound));
}

#[tokio::test]
async fn test_supervisor_receives_approval_request() {
    let h = Harness::new();
    let mut bob = local_user("bob", "pw");
    bob.set_supervisor(with_phone(User::new("carol"), CAROL_PHONE)).unwrap();
    h.users.insert(bob);
    let session = h.login("bob", "pw").await;

    h.flow.stage2(Some(&session), poll(), &ctx()).await.unwrap();
    let sent = h.gateway.sent();
    assert_eq!(sent[0].phone_number, CAROL_PHONE);
    assert_eq!(sent[0].name.as_deref(), Some("bob"));

    let code = h.gateway.last_code().unwrap();
    let outcome = h.flow.stage2(None, callback_input(&code), &ctx()).await.unwrap();
    assert_eq!(
        outcome,
        Stage2Outcome::Approved {
            user: "bob".to_string(),
            approver: Some("carol".to_string())
        }
    );
    assert!(h.audit_texts().contains(&"log in approved by carol".to_string()));
}

#[tokio::test]
async fn test_authenticated_level_never_drops() {
    let h = Harness::new();
    let (alice, secret) = with_totp(with_phone(local_user("alice", "pw"), ALICE_PHONE));
    h.users.insert(alice);
    let session = h.login("alice", "pw").await;
    let code = totp::current_code(&secret, h.clock.now()).unwrap();
    h.flow.stage2(Some(&session), totp_input(&code), &ctx()).await.unwrap();

    for input in [poll(), totp_input("123456"), poll()] {
        let outcome = h.flow.stage2(Some(&session), input, &ctx()).await.unwrap();
        assert!(matches!(outcome, Stage2Outcome::Authenticated { .. }));
        assert_eq!(h.flow.me(Some(&session)).unwrap().auth_level(), AuthLevel::Authenticated);
    }
    assert!(h.gateway.sent().is_empty());
}

#[tokio::test]
async fn test_anonymous_session_cannot_request_second_factor() {
    let h = Harness::new();
    let anonymous = h.sessions.create(UserHandle::new(User::anonymous()));

    let err = h
        .flow
        .stage2(Some(anonymous.id()), poll(), &ctx())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::IllegalTransition(_)));
    assert!(h.gateway.sent().is_empty());
}

#[tokio::test]
async fn test_missing_session_is_not_found() {
    let h = Harness::new();
    let err = h.flow.stage2(Some("missing"), poll(), &ctx()).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound));
}

#[tokio::test]
async fn test_without_gateway_unfinishable_session_is_destroyed() {
    let h = Harness::builder().without_mfa().build();
    h.users.insert(with_phone(local_user("alice", "pw"), ALICE_PHONE));
    let session = h.login("alice", "pw").await;

    let err = h.flow.stage2(Some(&session), poll(), &ctx()).await.unwrap_err();
    assert!(matches!(err, ServiceError::MfaUnavailable));
    assert!(h.sessions.retrieve(&session).is_none());
}

#[tokio::test]
async fn test_without_gateway_wrong_totp_destroys_session() {
    let h = Harness::builder().without_mfa().build();
    let (alice, _) = with_totp(local_user("alice", "pw"));
    h.users.insert(alice);
    let session = h.login("alice", "pw").await;

    let err = h
        .flow
        .stage2(Some(&session), totp_input("000000"), &ctx())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidCredentials));
    assert!(h.sessions.retrieve(&session).is_none());

    let err = h
        .flow
        .stage2(Some(&session), totp_input("000000"), &ctx())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound));
}

#[tokio::test]
async fn test_without_gateway_supervised_totp_destroys_session() {
    let h = Harness::builder().without_mfa().build();
    let (mut bob, secret) = with_totp(local_user("bob", "pw"));
    bob.set_supervisor(with_phone(User::new("carol"), CAROL_PHONE)).unwrap();
    h.users.insert(bob);
    let session = h.login("bob", "pw").await;

    let code = totp::current_code(&secret, h.clock.now()).unwrap();
    let err = h
        .flow
        .stage2(Some(&session), totp_input(&code), &ctx())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::PolicyViolation(_)));
    assert!(h.sessions.retrieve(&session).is_none());
}

#[tokio::test]
async fn test_user_without_phone_keeps_session_for_enrollment() {
    let h = Harness::new();
    h.users.insert(local_user("alice", "pw"));
    let session = h.login("alice", "pw").await;

    let err = h.flow.stage2(Some(&session), poll(), &ctx()).await.unwrap_err();
    assert!(matches!(err, ServiceError::MfaUnavailable));
    assert!(h.sessions.retrieve(&session).is_some());
}

#[tokio::test]
async fn test_directory_login_creates_unsaved_user() {
    let directory = MockDirectory::new(corp_directory(ShadowAccountPolicy::CreateEnabled))
        .with_account(
            "dave",
            "ldap-pw",
            HashMap::from([("mail".to_string(), "dave@corp.example.com".to_string())]),
        );
    let h = Harness::builder().directory(Arc::new(directory)).build();

    let outcome = h
        .flow
        .stage1(None, "dave", password("ldap-pw"), &ctx())
        .await
        .unwrap();

    assert!(!outcome.user.id.is_assigned());
    assert_eq!(outcome.user.additional_info["mail"], "dave@corp.example.com");
    assert_eq!(
        outcome.user.origin,
        Origin::Directory {
            name: "corp".to_string(),
            shadow_policy: ShadowAccountPolicy::CreateEnabled,
        }
    );
    assert!(h.users.users().is_empty());
}

#[tokio::test]
async fn test_directory_outage_is_a_dependency_failure() {
    let directory = Arc::new(MockDirectory::new(corp_directory(
        ShadowAccountPolicy::CreateDisabled,
    )));
    directory.set_failing(true);
    let h = Harness::builder().directory(directory.clone()).build();

    let err = h
        .flow
        .stage1(None, "dave", password("ldap-pw"), &ctx())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Dependency(_)));
    assert_eq!(directory.calls(), 1);
    assert!(h.sessions.is_empty());
}

#[tokio::test]
async fn test_deny_terminates_session() {
    let h = Harness::new();
    h.users.insert(local_user("alice", "pw"));
    let session = h.login("alice", "pw").await;

    h.flow.deny(&session, &ctx()).unwrap();
    assert!(h.sessions.retrieve(&session).is_none());
    assert!(h.audit_texts().contains(&"log in denied".to_string()));
}
