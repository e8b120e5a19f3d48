//! Card endpoints

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ScheduleError;
use crate::executor::{ApiResponse, RequestDefinition};
use crate::scheduler::{RequestOptions, Scheduler};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Card {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Label {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Parameters for creating a card
#[derive(Debug, Clone, Default, Serialize)]
pub struct CardAdd {
    #[serde(rename = "idList")]
    pub id_list: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelColor {
    Yellow,
    Purple,
    Blue,
    Red,
    Green,
    Orange,
    Black,
    Sky,
    Pink,
    Lime,
}

/// Parameters for adding a label to a card
#[derive(Debug, Clone, Serialize)]
pub struct LabelAdd {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// `None` creates a colorless label
    pub color: Option<LabelColor>,
}

/// Card operations, each routed through the shared scheduler
#[derive(Clone)]
pub struct Cards {
    scheduler: Scheduler,
}

impl Cards {
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }

    /// Create a card in a list
    pub async fn add(&self, params: &CardAdd, options: RequestOptions) -> Result<Card, ScheduleError> {
        debug!(id_list = %params.id_list, "Cards::add: called");
        let request = RequestDefinition::post("/cards").json(to_body(params)?);
        let response = self.scheduler.schedule(request, options).await?;
        decode(&response)
    }

    /// Create a label on a card
    pub async fn add_label(
        &self,
        card_id: &str,
        params: &LabelAdd,
        options: RequestOptions,
    ) -> Result<Label, ScheduleError> {
        debug!(%card_id, "Cards::add_label: called");
        let request = RequestDefinition::post(format!("/cards/{}/labels", card_id)).json(to_body(params)?);
        let response = self.scheduler.schedule(request, options).await?;
        decode(&response)
    }
}

fn to_body<T: Serialize>(params: &T) -> Result<serde_json::Value, ScheduleError> {
    serde_json::to_value(params).map_err(|e| ScheduleError::InvalidResponse(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(response: &ApiResponse) -> Result<T, ScheduleError> {
    response
        .parse()
        .map_err(|e| ScheduleError::InvalidResponse(format!("Unexpected response body: {}", e)))
}
