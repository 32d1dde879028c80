//! Issuer registration, configuration documents and issuance against a
//! local issuer service and an in-memory configuration vault.

use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value};

use edv_access::perms::{delegate, DelegationRequest};
use edv_access::remote::{IssueRequest, IssuerService, LocalKms, MemoryRegistry, RegistrationService};
use edv_access::store::{EdvStore, MemoryEdv, VaultInfo};
use edv_access::{
    AccessConfig, Account, ErrorKind, IssuerConfigurations, VaultAccess, CONFIGURATION_REFERENCE_ID,
    EDV_DOCUMENTS_TARGET_TYPE,
};
use edv_access_core::{now_millis, Action, Capability, InvocationTarget, Keypair};
use edv_access_testkit::{init_tracing, CannedResponse, CannedServer, EDV_URL, KMS_URL};

const ISSUER: &str = "did:key:z6MkIssuer";

struct Setup {
    access: VaultAccess,
    account: Account,
    store: Arc<MemoryEdv>,
    /// `{registration}` as the service answers for the account.
    registration: Value,
}

async fn setup() -> Setup {
    init_tracing();
    let access = VaultAccess::new(
        AccessConfig::default(),
        Arc::new(LocalKms::new(KMS_URL)),
        Arc::new(MemoryRegistry::new()),
    );
    let account = access.create_account("acct-1", "issuer secret").await.unwrap();
    let controller = access.controller(&account).await.unwrap();

    let service = Keypair::generate();
    let store = Arc::new(MemoryEdv::new(VaultInfo::new("z-config", service.principal(), EDV_URL)));
    let root = Capability::root(
        InvocationTarget::new(&store.vault().documents, EDV_DOCUMENTS_TARGET_TYPE),
        service.principal(),
    );
    let capability = delegate(
        &DelegationRequest::new(CONFIGURATION_REFERENCE_ID, &[Action::Read, Action::Write]),
        &root,
        &controller.id(),
        &service,
        now_millis(),
    )
    .unwrap();

    let registration = json!({
        "registration": {
            "issuer": ISSUER,
            "controller": controller.id(),
            "capability": [capability]
        }
    });
    Setup {
        access,
        account,
        store,
        registration,
    }
}

fn configurations<'a>(s: &'a Setup, server: &CannedServer) -> IssuerConfigurations<'a> {
    IssuerConfigurations::new(
        &s.access,
        RegistrationService::new(&server.config()).unwrap(),
        IssuerService::new(&server.config()).unwrap(),
        s.store.clone(),
    )
}

fn presentation() -> Value {
    json!({
        "type": "VerifiablePresentation",
        "verifiableCredential": [{
            "type": ["VerifiableCredential"],
            "credentialSubject": {"id": ISSUER, "name": "Registrar"}
        }]
    })
}

#[tokio::test]
async fn issuer_lifecycle_keeps_one_configuration_document() -> Result<()> {
    let s = setup().await;
    let registered = CannedResponse::json(200, &s.registration);
    let server = CannedServer::start([
        registered.clone(),
        registered.clone(),
        registered.clone(),
        registered,
        CannedResponse::empty(204),
    ])
    .await;
    let issuers = configurations(&s, &server);

    let created = issuers.register_issuer(&s.account, &presentation()).await?;
    assert_eq!(created.id, ISSUER);
    assert_eq!(created.config_type, "IssuerConfiguration");
    assert_eq!(s.store.len(), 1);

    let mut configuration = issuers.get(&s.account, ISSUER).await?;
    assert_eq!(configuration, created);

    configuration.flows.push(json!({"id": "registration", "credential": "Membership"}));
    issuers.update(&s.account, ISSUER, &configuration).await?;
    let read = issuers.get(&s.account, ISSUER).await?;
    assert_eq!(read.flows.len(), 1);
    assert_eq!(read.issuer["name"], json!("Registrar"));

    assert!(issuers.unregister_issuer(&s.account, ISSUER).await?);
    assert!(s.store.is_empty());

    let requests = server.requests();
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].target, "/vc-issuer/registrations");
    assert_eq!(requests[0].json()["controller"], json!("acct-1"));
    assert_eq!(requests.len(), 5);
    assert_eq!(requests[4].method, "DELETE");
    assert_eq!(requests[4].target, "/vc-issuer/registrations?issuer=did%3Akey%3Az6MkIssuer");
    Ok(())
}

#[tokio::test]
async fn presentation_without_credential_is_rejected_before_registering() -> Result<()> {
    let s = setup().await;
    let server = CannedServer::start(Vec::new()).await;
    let issuers = configurations(&s, &server);

    let err = issuers
        .register_issuer(&s.account, &json!({"type": "VerifiablePresentation"}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(server.requests().is_empty());
    Ok(())
}

#[tokio::test]
async fn unknown_issuer_configuration_is_not_found() -> Result<()> {
    let s = setup().await;
    let server = CannedServer::start([
        CannedResponse::error(404, "NotFoundError", "Registration not found."),
        CannedResponse::json(200, &s.registration),
    ])
    .await;
    let issuers = configurations(&s, &server);

    let err = issuers.get(&s.account, "did:key:z6MkOther").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // Registered, but no configuration written yet.
    assert!(!issuers.remove(&s.account, ISSUER).await?);
    Ok(())
}

#[tokio::test]
async fn configurations_listed_and_credentials_issued() -> Result<()> {
    let s = setup().await;
    let server = CannedServer::start([
        CannedResponse::json(
            200,
            &json!([{"configuration": {"content": {
                "id": ISSUER,
                "type": "IssuerConfiguration",
                "issuer": {"id": ISSUER},
                "flows": []
            }}}]),
        ),
        CannedResponse::json(200, &json!({"verifiableCredential": [{"id": "urn:uuid:c-1"}]})),
    ])
    .await;
    let issuers = configurations(&s, &server);

    let all = issuers.get_all().await?;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, ISSUER);

    let issued = issuers
        .issue(&IssueRequest {
            issuer: ISSUER.into(),
            flow: "registration".into(),
            credentials: vec![json!({"type": ["VerifiableCredential"]})],
            presentation: None,
        })
        .await?;
    assert_eq!(issued["verifiableCredential"][0]["id"], json!("urn:uuid:c-1"));

    let requests = server.requests();
    assert_eq!(requests[1].target, "/vc-issuer/issue");
    assert_eq!(requests[1].json()["flow"], json!("registration"));
    Ok(())
}
