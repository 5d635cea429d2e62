use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use tracing::{event, instrument, Level};

use super::state::ApiState;
use crate::auth::CREDENTIAL_HEADER;
use crate::collective::Collective;
use crate::error::Result;
use crate::event::{CollectiveKind, Event};
use crate::gossip::FrequencyStatus;
use crate::member::Member;
use crate::pubsub::Message;

fn authorized<'a>(
    state: &'a ApiState,
    kind: CollectiveKind,
    headers: &HeaderMap,
) -> Result<&'a Collective> {
    let collective = state.collective(kind)?;
    let credential = headers
        .get(CREDENTIAL_HEADER)
        .and_then(|value| value.to_str().ok());
    collective.authenticator().verify(credential).map_err(|err| {
        event!(
            Level::WARN,
            message = "Rejected peer call",
            kind = kind.as_str(),
            err = format!("{}", err)
        );
        err
    })?;
    Ok(collective)
}

#[instrument(skip(state, headers), level = "debug")]
pub async fn members(
    Path(kind): Path<CollectiveKind>,
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Member>>> {
    let collective = authorized(&state, kind, &headers)?;
    Ok(Json(collective.members()))
}

#[instrument(skip(state, headers, event), level = "debug")]
pub async fn on_event(
    Path(kind): Path<CollectiveKind>,
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(event): Json<Event>,
) -> Result<StatusCode> {
    let collective = authorized(&state, kind, &headers)?;
    collective.on_event(event);
    Ok(StatusCode::ACCEPTED)
}

#[instrument(skip(state, headers), level = "debug")]
pub async fn frequencies(
    Path(kind): Path<CollectiveKind>,
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<Vec<FrequencyStatus>>> {
    let collective = authorized(&state, kind, &headers)?;
    Ok(Json(collective.frequencies()))
}

#[instrument(skip(state, headers), level = "debug")]
pub async fn publish(
    Path(kind): Path<CollectiveKind>,
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(message): Json<Message>,
) -> Result<StatusCode> {
    let collective = authorized(&state, kind, &headers)?;
    let dispatch = collective.publish(&message)?;
    event!(
        Level::DEBUG,
        message = "Published message",
        topic = message.topic.as_str(),
        peers = dispatch.len()
    );
    Ok(StatusCode::ACCEPTED)
}
