//! Prompt builder: substitutes a request into the configured templates.

use crate::config::Prompts;
use crate::domain::GenerationRequest;
use crate::util::fill_template;

/// A model-ready prompt: system instructions plus the user turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Prompt {
  pub system: String,
  pub user: String,
}

impl Prompt {
  pub fn len(&self) -> usize {
    self.system.len() + self.user.len()
  }

  pub fn is_empty(&self) -> bool {
    self.system.is_empty() && self.user.is_empty()
  }
}

pub fn lesson_prompt(prompts: &Prompts, request: &GenerationRequest) -> Prompt {
  let pairs = [("title", request.title.as_str()), ("focus", request.focus.as_str())];
  Prompt {
    system: fill_template(&prompts.lesson_system, &pairs),
    user: fill_template(&prompts.lesson_user_template, &pairs),
  }
}

pub fn breakdown_prompt(prompts: &Prompts, topic: &GenerationRequest) -> Prompt {
  let pairs = [("title", topic.title.as_str()), ("focus", topic.focus.as_str())];
  Prompt {
    system: fill_template(&prompts.breakdown_system, &pairs),
    user: fill_template(&prompts.breakdown_user_template, &pairs),
  }
}
