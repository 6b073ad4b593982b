//! Scripted mock broker for deterministic tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::plan::{ClassificationOutput, ConvClassificationPlan};

use super::{BrokerFailure, BrokerResult, LlmBroker, SamplingParams};

/// Mock [`LlmBroker`]: queues of scripted responses, consumed in order.
///
/// Prompts are recorded so tests can assert on the slots the runtime fills
/// (replanning reason, failure logs, counters). Exhausted queues return a
/// server failure for `plan`/`classify` and benign defaults for
/// `summarize`/`decide_next_query`.
#[derive(Default)]
pub struct MockBroker {
    plans: Mutex<VecDeque<BrokerResult<ConvClassificationPlan>>>,
    classifications: Mutex<VecDeque<BrokerResult<Vec<ClassificationOutput>>>>,
    summaries: Mutex<VecDeque<BrokerResult<String>>>,
    decisions: Mutex<VecDeque<BrokerResult<String>>>,
    plan_prompts: Mutex<Vec<String>>,
    classify_prompts: Mutex<Vec<String>>,
    summary_prompts: Mutex<Vec<String>>,
    decision_prompts: Mutex<Vec<String>>,
    decision_params: Mutex<Vec<SamplingParams>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_plan(&self, result: BrokerResult<ConvClassificationPlan>) {
        self.plans.lock().unwrap().push_back(result);
    }

    pub fn push_classification(&self, result: BrokerResult<Vec<ClassificationOutput>>) {
        self.classifications.lock().unwrap().push_back(result);
    }

    pub fn push_summary(&self, result: BrokerResult<String>) {
        self.summaries.lock().unwrap().push_back(result);
    }

    pub fn push_decision(&self, result: BrokerResult<String>) {
        self.decisions.lock().unwrap().push_back(result);
    }

    pub fn plan_prompts(&self) -> Vec<String> {
        self.plan_prompts.lock().unwrap().clone()
    }

    pub fn classify_prompts(&self) -> Vec<String> {
        self.classify_prompts.lock().unwrap().clone()
    }

    pub fn decision_prompts(&self) -> Vec<String> {
        self.decision_prompts.lock().unwrap().clone()
    }

    pub fn decision_params(&self) -> Vec<SamplingParams> {
        self.decision_params.lock().unwrap().clone()
    }

    pub fn classify_call_count(&self) -> usize {
        self.classify_prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmBroker for MockBroker {
    async fn plan(&self, prompt: &str) -> BrokerResult<ConvClassificationPlan> {
        self.plan_prompts.lock().unwrap().push(prompt.to_string());
        self.plans
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(BrokerFailure::server("mock: no plan scripted")))
    }

    async fn classify(&self, prompt: &str) -> BrokerResult<Vec<ClassificationOutput>> {
        self.classify_prompts
            .lock()
            .unwrap()
            .push(prompt.to_string());
        self.classifications
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(BrokerFailure::server("mock: no classification scripted")))
    }

    async fn summarize(&self, prompt: &str) -> BrokerResult<String> {
        self.summary_prompts
            .lock()
            .unwrap()
            .push(prompt.to_string());
        self.summaries
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("- mock summary".to_string()))
    }

    async fn decide_next_query(
        &self,
        prompt: &str,
        params: &SamplingParams,
    ) -> BrokerResult<String> {
        self.decision_prompts
            .lock()
            .unwrap()
            .push(prompt.to_string());
        self.decision_params.lock().unwrap().push(*params);
        self.decisions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("TERMINATE".to_string()))
    }
}
