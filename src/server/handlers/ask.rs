use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::answer::AnswerRequest;
use crate::core::errors::ApiError;
use crate::state::AppState;

pub async fn ask(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AnswerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state.engine.answer(&request).await.map_err(|err| {
        tracing::warn!(kind = err.kind(), "Query failed: {}", err);
        err
    })?;
    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use axum::http::StatusCode;
    use serde_json::Value;

    use super::*;
    use crate::feedback::{FeedbackRequest, Polarity};
    use crate::server::handlers::{feedback, index, stats};
    use crate::test_support::test_state;

    async fn body_json(response: axum::response::Response) -> (StatusCode, Value) {
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn index_ask_and_correct_over_http_handlers() {
        let (state, _dir) = test_state().await;
        std::fs::write(
            state.paths.raw_dir.join("cnil_effacement.md"),
            "---\ntitle: Droit à l'effacement\nsource: https://www.cnil.fr/effacement\ncategory: cnil\n---\n\nLe droit à l'effacement permet de demander la suppression de ses données.",
        )
        .unwrap();

        let response = index::run_index(State(state.clone()), None)
            .await
            .unwrap()
            .into_response();
        let (status, report) = body_json(response).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["indexed"], 1);

        let question = "comment demander l'effacement de mes données";
        let response = ask(State(state.clone()), Json(AnswerRequest::new(question)))
            .await
            .unwrap()
            .into_response();
        let (_, answer) = body_json(response).await;
        assert_eq!(answer["status"], "grounded");
        assert_eq!(answer["citations"][0]["category"], "CNIL");

        feedback::submit_feedback(
            State(state.clone()),
            Json(FeedbackRequest {
                query: question.to_string(),
                shown_answer: answer["answer"].as_str().unwrap().to_string(),
                polarity: Polarity::Negative,
                answer_id: answer["answer_id"].as_str().map(str::to_string),
                correction: Some("Adressez votre demande au responsable du traitement.".into()),
                correction_id: None,
                category: None,
            }),
        )
        .await
        .unwrap();

        let response = ask(State(state.clone()), Json(AnswerRequest::new(question)))
            .await
            .unwrap()
            .into_response();
        let (_, corrected) = body_json(response).await;
        assert_eq!(corrected["status"], "corrected");
        assert_eq!(
            corrected["answer"],
            "Adressez votre demande au responsable du traitement."
        );

        let response = stats::get_stats(State(state.clone()))
            .await
            .unwrap()
            .into_response();
        let (_, stats) = body_json(response).await;
        assert_eq!(stats["index"]["total_fragments"], 1);
        assert_eq!(stats["corrections"], 1);
        assert_eq!(stats["feedback"]["negative"], 1);
    }

    #[tokio::test]
    async fn blank_query_maps_to_bad_request() {
        let (state, _dir) = test_state().await;
        let response = match ask(State(state), Json(AnswerRequest::new(" "))).await {
            Ok(_) => panic!("blank query accepted"),
            Err(err) => err.into_response(),
        };
        let (status, body) = body_json(response).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "bad_request");
    }
}
