pub mod error;
pub mod gatherings;
pub mod middleware;
pub mod state;
pub mod sync;
pub mod votes;

use axum::{
    Router, middleware as axum_middleware,
    routing::{delete, get, post, put},
};

pub use error::ApiError;
pub use state::{AppState, AppStateInner};

/// All HTTP routes. Everything except the sync upgrade requires a bearer token.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/gatherings", post(gatherings::create_gathering).get(gatherings::my_gatherings))
        .route("/gatherings/{code}", get(gatherings::gathering_detail))
        .route("/gatherings/{code}/poll", get(gatherings::poll))
        .route("/gatherings/{code}/join", post(gatherings::join_gathering))
        .route("/gatherings/{code}/nominating", post(gatherings::start_nominating))
        .route("/gatherings/{code}/location", put(gatherings::update_location))
        .route("/gatherings/{code}/depart", post(gatherings::depart))
        .route("/gatherings/{code}/arrive", post(gatherings::arrive))
        .route("/gatherings/{code}/nominations", post(votes::nominate))
        .route(
            "/gatherings/{code}/nominations/{nomination_id}",
            delete(votes::withdraw_nomination),
        )
        .route("/gatherings/{code}/votes", post(votes::start_voting))
        .route("/gatherings/{code}/votes/{vote_id}/ballots", post(votes::cast_vote))
        .route_layer(axum_middleware::from_fn_with_state(state.clone(), middleware::require_auth));

    Router::new()
        .merge(protected)
        .route("/sync", get(sync::ws_upgrade))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use jsonwebtoken::{EncodingKey, Header, encode};
    use rally_db::Database;
    use rally_engine::travel::StraightLineEstimator;
    use rally_engine::{Engine, EngineConfig};
    use rally_gateway::Dispatcher;
    use rally_types::api::Claims;
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use uuid::Uuid;

    const SECRET: &str = "test-secret";

    fn app() -> Router {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let dispatcher = Dispatcher::new();
        let engine = Engine::new(db.clone(), Arc::new(StraightLineEstimator), EngineConfig::default())
            .with_notifier(Arc::new(dispatcher.clone()));
        router(Arc::new(AppStateInner {
            engine: Arc::new(engine),
            db,
            dispatcher,
            jwt_secret: SECRET.into(),
        }))
    }

    fn token(user: Uuid) -> String {
        let exp = (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as usize;
        encode(
            &Header::default(),
            &Claims { sub: user, exp },
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    async fn call(app: &Router, method: &str, uri: &str, user: Option<Uuid>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            req = req.header(header::AUTHORIZATION, format!("Bearer {}", token(user)));
        }
        let req = match body {
            Some(body) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, value)
    }

    fn create_body() -> Value {
        json!({
            "name": "Hotpot night",
            "target_time": chrono::Utc::now() + chrono::Duration::hours(3),
            "creator_nickname": "Ana",
            "creator_location": { "lng": 116.40, "lat": 39.90 }
        })
    }

    #[tokio::test]
    async fn requests_without_a_token_are_rejected() {
        let app = app();
        let (status, body) = call(&app, "GET", "/gatherings", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn create_join_and_poll() {
        let app = app();
        let ana = Uuid::new_v4();
        let bo = Uuid::new_v4();

        let (status, gathering) = call(&app, "POST", "/gatherings", Some(ana), Some(create_body())).await;
        assert_eq!(status, StatusCode::CREATED);
        let code = gathering["code"].as_str().unwrap().to_string();

        let (status, _) = call(
            &app,
            "POST",
            &format!("/gatherings/{code}/join"),
            Some(bo),
            Some(json!({ "nickname": "Bo" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, poll) = call(&app, "GET", &format!("/gatherings/{code}/poll?version=1"), Some(ana), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(poll["changed"], true);
        assert_eq!(poll["version"], 2);
        assert_eq!(poll["snapshot"]["participants"].as_array().unwrap().len(), 2);

        let (_, poll) = call(&app, "GET", &format!("/gatherings/{code}/poll?version=2"), Some(ana), None).await;
        assert_eq!(poll["changed"], false);
        assert!(poll.get("snapshot").is_none());
    }

    #[tokio::test]
    async fn engine_errors_become_json_bodies() {
        let app = app();
        let ana = Uuid::new_v4();
        let bo = Uuid::new_v4();
        let (_, gathering) = call(&app, "POST", "/gatherings", Some(ana), Some(create_body())).await;
        let code = gathering["code"].as_str().unwrap().to_string();
        call(&app, "POST", &format!("/gatherings/{code}/join"), Some(bo), Some(json!({ "nickname": "Bo" }))).await;

        let (status, body) = call(&app, "POST", &format!("/gatherings/{code}/nominating"), Some(bo), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "NOT_CREATOR");

        let (status, body) = call(&app, "GET", "/gatherings/ZZZZZZ", Some(ana), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn nominate_vote_and_load_the_result() {
        let app = app();
        let ana = Uuid::new_v4();
        let bo = Uuid::new_v4();
        let (_, gathering) = call(&app, "POST", "/gatherings", Some(ana), Some(create_body())).await;
        let code = gathering["code"].as_str().unwrap().to_string();
        call(&app, "POST", &format!("/gatherings/{code}/join"), Some(bo), Some(json!({ "nickname": "Bo" }))).await;
        call(&app, "POST", &format!("/gatherings/{code}/nominating"), Some(ana), None).await;

        let mut nominations = Vec::new();
        for (user, place) in [(ana, "p1"), (bo, "p2")] {
            let body = json!({
                "place_id": place,
                "name": format!("Place {place}"),
                "location": { "lng": 116.42, "lat": 39.92 }
            });
            let (status, nomination) =
                call(&app, "POST", &format!("/gatherings/{code}/nominations"), Some(user), Some(body)).await;
            assert_eq!(status, StatusCode::CREATED);
            nominations.push(nomination["id"].as_str().unwrap().to_string());
        }

        let (status, vote) = call(&app, "POST", &format!("/gatherings/{code}/votes"), Some(ana), None).await;
        assert_eq!(status, StatusCode::CREATED);
        let vote_id = vote["id"].as_str().unwrap().to_string();

        let ballots = format!("/gatherings/{code}/votes/{vote_id}/ballots");
        let pick = json!({ "nomination_id": nominations[1] });
        let (status, detail) = call(&app, "POST", &ballots, Some(ana), Some(pick.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["status"], "active");
        let (_, detail) = call(&app, "POST", &ballots, Some(bo), Some(pick)).await;
        assert_eq!(detail["status"], "resolved");

        let (status, snapshot) = call(&app, "GET", &format!("/gatherings/{code}"), Some(bo), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(snapshot["gathering"]["status"], "confirmed");
        let confirmed: Vec<_> = snapshot["nominations"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|n| n["is_confirmed"] == true)
            .map(|n| n["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(confirmed, vec![nominations[1].clone()]);
    }
}
