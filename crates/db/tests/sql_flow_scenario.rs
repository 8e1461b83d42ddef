use std::sync::Arc;

use chrono::Utc;

use karigar_core::audit::NoopAuditSink;
use karigar_core::config::{MissionsConfig, RewardsConfig};
use karigar_core::domain::account::{AccountRole, ChatId, NewAccount};
use karigar_core::domain::mission::MissionType;
use karigar_core::domain::seller::ProductCategory;
use karigar_core::flows::{
    AdvanceOutcome, Collaborators, FlowKind, FlowStateStore, StepEngine, StepInput,
};
use karigar_core::missions::MissionTracker;
use karigar_core::ports::{
    MediaKind, MediaRef, RecordStore, RecordingMessenger, StaticDocumentRenderer,
    StaticMediaUploader,
};
use karigar_db::{connect_with_settings, migrations, SqlFlowStateStore, SqlMissionStore, SqlRecordStore};

const CHAT: ChatId = ChatId(4242);

struct Stack {
    engine: StepEngine,
    flows: Arc<SqlFlowStateStore>,
    records: Arc<SqlRecordStore>,
    missions: Arc<MissionTracker>,
}

async fn stack() -> Stack {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrations");

    let flows = Arc::new(SqlFlowStateStore::new(pool.clone()));
    let records = Arc::new(SqlRecordStore::new(pool.clone()));
    let missions = Arc::new(MissionTracker::new(
        Arc::new(SqlMissionStore::new(pool)),
        records.clone(),
        MissionsConfig::default(),
    ));

    records
        .create_account(NewAccount {
            email: "seller@x.com".to_owned(),
            name: "Meera".to_owned(),
            phone: None,
            city: Some("Jaipur".to_owned()),
            role: AccountRole::Seller,
        })
        .await
        .expect("account");
    records.link_account("seller@x.com", CHAT).await.expect("link");

    let engine = StepEngine::new(
        Collaborators {
            flows: flows.clone(),
            records: records.clone(),
            media: Arc::new(StaticMediaUploader::default()),
            documents: Arc::new(StaticDocumentRenderer::default()),
            messenger: Arc::new(RecordingMessenger::default()),
            missions: missions.clone(),
            audit: Arc::new(NoopAuditSink),
        },
        RewardsConfig::default(),
    );
    Stack { engine, flows, records, missions }
}

async fn feed(stack: &Stack, kind: FlowKind, input: StepInput) -> AdvanceOutcome {
    let step = stack
        .flows
        .get(CHAT, kind)
        .await
        .expect("lookup")
        .and_then(|instance| instance.current_step())
        .expect("active flow");
    stack.engine.advance(CHAT, kind, input, step + 1).await.expect("advance")
}

fn text(value: &str) -> StepInput {
    StepInput::Text(value.to_owned())
}

#[tokio::test]
async fn weekly_product_flow_persists_product_and_mission_in_sqlite() {
    let stack = stack().await;
    let kind = FlowKind::WeeklyProductAdd;

    stack.engine.advance(CHAT, kind, StepInput::Empty, 1).await.expect("start");
    feed(&stack, kind, text("Terracotta Lamp")).await;
    feed(&stack, kind, StepInput::Media(MediaRef::new("photo-1", MediaKind::Photo))).await;
    feed(&stack, kind, text("Wheel thrown and kiln fired.")).await;
    feed(&stack, kind, text("Home Decor")).await;
    feed(&stack, kind, text("Khurja")).await;
    let finished = feed(&stack, kind, text("❌ No")).await;
    assert!(matches!(finished, AdvanceOutcome::Completed(_)), "got {finished:?}");

    let listed =
        stack.records.products_by_category(ProductCategory::HomeDecor).await.expect("browse");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].product.name, "Terracotta Lamp");
    assert!(!listed[0].product.sells_online);

    assert!(stack
        .missions
        .is_completed_at("seller@x.com", MissionType::Product, Utc::now())
        .await
        .expect("mission lookup"));
    let account =
        stack.records.find_account_by_email("seller@x.com").await.expect("q").expect("account");
    assert_eq!(account.balance, MissionsConfig::default().product_reward);
    assert_eq!(stack.flows.count().await.expect("count"), 0);
}

#[tokio::test]
async fn second_weekly_product_in_the_same_week_is_refused_at_start() {
    let stack = stack().await;
    stack
        .missions
        .record_completion("seller@x.com", MissionType::Product)
        .await
        .expect("prior completion");

    let refused = stack.engine.advance(CHAT, FlowKind::WeeklyProductAdd, StepInput::Empty, 1).await;
    assert!(refused.is_err());
    assert!(stack.flows.get(CHAT, FlowKind::WeeklyProductAdd).await.expect("get").is_none());
}
