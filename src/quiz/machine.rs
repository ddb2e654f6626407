use std::sync::Arc;

use log::{debug, info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::quiz::payload::{PayloadSlot, ResultPayload};
use crate::quiz::resolve::ResolutionEngine;
use crate::quiz::Questionnaire;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QuizError {
    #[error("the quiz has not been started")]
    NotStarted,
    #[error("step {step} has no answer yet")]
    Unanswered { step: usize },
    #[error("step {got} is not the current step {current}")]
    WrongStep { current: usize, got: usize },
    #[error("question at step {step} has no option {option}")]
    UnknownOption { step: usize, option: u32 },
    #[error("there is no candidate list {0}")]
    UnknownSource(usize),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    NotStarted,
    InProgress {
        step: usize,
    },
    Submitting,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// `primary` is the list fetched up front for a quick first look.
    Start { primary: usize },
    /// With `advance` set the quiz moves on (or submits) right away.
    Select {
        step: usize,
        option: u32,
        advance: bool,
    },
    Back,
    Next,
    Submit,
    Complete,
    Restart,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    LoadPrimary(usize),
    Submit { key: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: QuizState,
    pub effect: Option<Effect>,
}

impl Transition {
    fn stay(state: &QuizState) -> Self {
        Self {
            state: state.clone(),
            effect: None,
        }
    }

    fn to(state: QuizState) -> Self {
        Self {
            state,
            effect: None,
        }
    }
}

/// Everything the quiz needs to remember between events. Serializable so a
/// dialogue storage can keep it per chat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizState {
    pub phase: Phase,
    pub answers: Vec<Option<u32>>,
    pub primary: Option<usize>,
}

impl QuizState {
    pub fn step(&self) -> Option<usize> {
        match self.phase {
            Phase::InProgress { step } => Some(step),
            _ => None,
        }
    }

    pub fn answer(&self, step: usize) -> Option<u32> {
        self.answers.get(step).copied().flatten()
    }

    /// Pure transition function. Events arriving while a submission is
    /// running, or after it finished, leave the state untouched.
    pub fn apply(&self, questionnaire: &Questionnaire, event: Event) -> Result<Transition, QuizError> {
        if matches!(self.phase, Phase::Submitting) {
            return Ok(match event {
                Event::Complete => Transition::to(QuizState {
                    phase: Phase::Completed,
                    ..self.clone()
                }),
                _ => Transition::stay(self),
            });
        }

        match event {
            Event::Start { primary } => Ok(Transition {
                state: QuizState {
                    phase: Phase::InProgress { step: 0 },
                    answers: vec![None; questionnaire.len()],
                    primary: Some(primary),
                },
                effect: Some(Effect::LoadPrimary(primary)),
            }),
            Event::Restart => Ok(Transition::to(QuizState::default())),
            Event::Complete => Ok(Transition::stay(self)),
            _ if self.phase == Phase::Completed => Ok(Transition::stay(self)),
            Event::Select {
                step,
                option,
                advance,
            } => {
                let current = self.step().ok_or(QuizError::NotStarted)?;
                if step != current {
                    return Err(QuizError::WrongStep { current, got: step });
                }
                questionnaire
                    .question(step)
                    .and_then(|q| q.option(option))
                    .ok_or(QuizError::UnknownOption { step, option })?;

                let mut state = self.clone();
                state.answers.resize(questionnaire.len(), None);
                state.answers[step] = Some(option);
                if !advance {
                    return Ok(Transition::to(state));
                }
                state.forward(questionnaire, step)
            }
            Event::Back => {
                let current = self.step().ok_or(QuizError::NotStarted)?;
                if current == 0 {
                    return Ok(Transition::stay(self));
                }
                Ok(Transition::to(QuizState {
                    phase: Phase::InProgress { step: current - 1 },
                    ..self.clone()
                }))
            }
            Event::Next => {
                let current = self.step().ok_or(QuizError::NotStarted)?;
                if self.answer(current).is_none() {
                    return Err(QuizError::Unanswered { step: current });
                }
                self.clone().forward(questionnaire, current)
            }
            Event::Submit => {
                self.step().ok_or(QuizError::NotStarted)?;
                self.clone().submit(questionnaire)
            }
        }
    }

    fn forward(mut self, questionnaire: &Questionnaire, current: usize) -> Result<Transition, QuizError> {
        if current < questionnaire.last_step() {
            self.phase = Phase::InProgress { step: current + 1 };
            return Ok(Transition::to(self));
        }
        self.submit(questionnaire)
    }

    fn submit(mut self, questionnaire: &Questionnaire) -> Result<Transition, QuizError> {
        let key = questionnaire
            .lookup_key(&self.answers)
            .map_err(|step| QuizError::Unanswered { step })?;
        self.phase = Phase::Submitting;
        Ok(Transition {
            state: self,
            effect: Some(Effect::Submit { key }),
        })
    }
}

/// What the presentation layer should show after an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Idle,
    Question { step: usize },
    Completed(ResultPayload),
    Unchanged,
}

/// Drives a [`QuizState`] and carries out the effects its transitions ask for.
pub struct QuizMachine {
    questionnaire: &'static Questionnaire,
    state: QuizState,
    engine: Arc<ResolutionEngine>,
    slot: PayloadSlot,
}

impl QuizMachine {
    pub fn new(questionnaire: &'static Questionnaire, engine: Arc<ResolutionEngine>, slot: PayloadSlot) -> Self {
        Self::resume(questionnaire, QuizState::default(), engine, slot)
    }

    /// Picks up a state stored elsewhere, e.g. in a chat dialogue.
    pub fn resume(
        questionnaire: &'static Questionnaire,
        state: QuizState,
        engine: Arc<ResolutionEngine>,
        slot: PayloadSlot,
    ) -> Self {
        Self {
            questionnaire,
            state,
            engine,
            slot,
        }
    }

    pub fn state(&self) -> &QuizState {
        &self.state
    }

    pub fn into_state(self) -> QuizState {
        self.state
    }

    /// Starts with a uniformly random primary list.
    pub async fn start(&mut self) -> Result<Outcome, QuizError> {
        let count = self.engine.cache().source_count();
        if count == 0 {
            return Err(QuizError::UnknownSource(0));
        }
        let primary = rand::thread_rng().gen_range(0..count);
        self.start_with(primary).await
    }

    pub async fn start_with(&mut self, primary: usize) -> Result<Outcome, QuizError> {
        if primary >= self.engine.cache().source_count() {
            return Err(QuizError::UnknownSource(primary));
        }
        self.dispatch(Event::Start { primary }).await
    }

    /// Records an answer without moving.
    pub async fn select_option(&mut self, step: usize, option: u32) -> Result<Outcome, QuizError> {
        self.dispatch(Event::Select {
            step,
            option,
            advance: false,
        })
        .await
    }

    /// Records an answer for the current step and moves on, submitting on the last step.
    pub async fn choose(&mut self, option: u32) -> Result<Outcome, QuizError> {
        let step = self.state.step().ok_or(QuizError::NotStarted)?;
        self.dispatch(Event::Select {
            step,
            option,
            advance: true,
        })
        .await
    }

    pub async fn back(&mut self) -> Result<Outcome, QuizError> {
        self.dispatch(Event::Back).await
    }

    pub async fn next(&mut self) -> Result<Outcome, QuizError> {
        self.dispatch(Event::Next).await
    }

    pub async fn submit(&mut self) -> Result<Outcome, QuizError> {
        self.dispatch(Event::Submit).await
    }

    /// Forgets answers and the stored result.
    pub async fn restart(&mut self) -> Result<Outcome, QuizError> {
        self.slot.clear();
        self.dispatch(Event::Restart).await
    }

    async fn dispatch(&mut self, event: Event) -> Result<Outcome, QuizError> {
        let Transition { state, effect } = self.state.apply(self.questionnaire, event)?;
        let changed = state != self.state;
        self.state = state;

        match effect {
            Some(Effect::LoadPrimary(index)) => {
                self.load_primary(index).await;
                Ok(Outcome::Question { step: 0 })
            }
            Some(Effect::Submit { key }) => {
                let payload = self.finish(key).await;
                Ok(Outcome::Completed(payload))
            }
            None if !changed => Ok(Outcome::Unchanged),
            None => Ok(match self.state.phase {
                Phase::NotStarted => Outcome::Idle,
                Phase::InProgress { step } => Outcome::Question { step },
                Phase::Submitting | Phase::Completed => Outcome::Unchanged,
            }),
        }
    }

    async fn load_primary(&self, index: usize) {
        let location = self.engine.cache().location(index).unwrap_or_default();
        match self.engine.cache().get(index).await {
            Some(list) => info!("[quiz] chosen list loaded: {} items: {}", location, list.len()),
            None => warn!("[quiz] no candidate list at index {}", index),
        }
    }

    async fn finish(&mut self, key: String) -> ResultPayload {
        // the full scan reuses the primary list already sitting in the cache
        let found = self.engine.resolve(&key).await;
        let primary = self
            .state
            .primary
            .and_then(|i| self.engine.cache().location(i))
            .map(str::to_string);

        let payload = ResultPayload::build(
            self.questionnaire,
            self.state.answers.clone(),
            key,
            found,
            primary,
        );

        debug!("[quiz] answers: {:?}", payload.answers);
        info!(
            "[quiz] key {} -> {} (list: {})",
            payload.key,
            payload.result.corner,
            payload.source_list.as_deref().unwrap_or("-")
        );

        self.slot.save(&payload);
        if let Ok(t) = self.state.apply(self.questionnaire, Event::Complete) {
            self.state = t.state;
        }
        payload
    }
}
