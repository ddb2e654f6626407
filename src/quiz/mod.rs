pub mod cache;
pub mod machine;
pub mod payload;
pub mod resolve;
pub mod source;
pub mod store;

use serde::{Deserialize, Deserializer, Serialize};

/// Separator placed between option ids when building a lookup key.
pub const KEY_SEPARATOR: &str = "-";

pub const DEFAULT_CORNER_NAME: &str = "Terminal F — Рекомендация";
const DEFAULT_CORNER_SLOGAN: &str = "Универсальный выбор для любого настроения";
const DEFAULT_CORNER_IMAGE: &str = "/assets/default.png";
const DEFAULT_CORNER_COLOR: &str = "#414141";

/// A themed result card. Only `key` is mandatory in source data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Corner {
    pub key: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub corner: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub slogan: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub image: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub color: String,
}

// Lists in the wild send `null` for fields they leave out.
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl Corner {
    /// The sentinel shown when no candidate list knows the key.
    pub fn fallback() -> Self {
        Self {
            key: String::new(),
            corner: DEFAULT_CORNER_NAME.to_string(),
            slogan: DEFAULT_CORNER_SLOGAN.to_string(),
            image: DEFAULT_CORNER_IMAGE.to_string(),
            color: DEFAULT_CORNER_COLOR.to_string(),
        }
    }

    /// Recognises the sentinel by display name, so it survives a JSON round-trip.
    pub fn is_fallback(&self) -> bool {
        self.corner.is_empty() || self.corner == DEFAULT_CORNER_NAME
    }

    pub fn color_or_default(&self) -> &str {
        if self.color.is_empty() {
            DEFAULT_CORNER_COLOR
        } else {
            &self.color
        }
    }

    pub fn image_or_default(&self) -> &str {
        if self.image.is_empty() {
            DEFAULT_CORNER_IMAGE
        } else {
            &self.image
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuestionOption {
    pub id: u32,
    pub title: &'static str,
    pub desc: Option<&'static str>,
    pub image: Option<&'static str>,
    /// Only set on the timing question's options.
    pub suffix: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Question {
    pub id: u32,
    pub title: &'static str,
    pub options: &'static [QuestionOption],
    /// The timing question adds a display suffix instead of a key part.
    pub timing: bool,
}

impl Question {
    pub fn option(&self, id: u32) -> Option<&QuestionOption> {
        self.options.iter().find(|o| o.id == id)
    }

    pub fn option_by_title(&self, title: &str) -> Option<&QuestionOption> {
        self.options.iter().find(|o| o.title == title)
    }
}

/// A fixed, ordered set of questions.
#[derive(Debug, Clone, Copy)]
pub struct Questionnaire {
    pub questions: &'static [Question],
}

impl Questionnaire {
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn question(&self, step: usize) -> Option<&Question> {
        self.questions.get(step)
    }

    pub fn last_step(&self) -> usize {
        self.questions.len().saturating_sub(1)
    }

    /// Builds the lookup key from every key-bearing slot, in question order.
    ///
    /// Fails with the first unset key-bearing step.
    pub fn lookup_key(&self, answers: &[Option<u32>]) -> Result<String, usize> {
        let mut parts = Vec::with_capacity(self.questions.len());
        for (step, question) in self.questions.iter().enumerate() {
            if question.timing {
                continue;
            }
            match answers.get(step).copied().flatten() {
                Some(id) => parts.push(id.to_string()),
                None => return Err(step),
            }
        }
        Ok(parts.join(KEY_SEPARATOR))
    }

    /// Suffix for the chosen timing option; `None` when unanswered.
    pub fn timing_suffix(&self, answers: &[Option<u32>]) -> Option<&'static str> {
        let (step, question) = self
            .questions
            .iter()
            .enumerate()
            .find(|(_, q)| q.timing)?;
        let chosen = answers.get(step).copied().flatten()?;
        question.option(chosen)?.suffix
    }

    /// Slogan plus timing suffix; the suffix is only added for genuine matches.
    pub fn display_text(&self, result: &Corner, matched: bool, answers: &[Option<u32>]) -> String {
        let mut text = result.slogan.clone();
        if matched {
            if let Some(suffix) = self.timing_suffix(answers) {
                text.push_str(suffix);
            }
        }
        text
    }
}

pub static QUESTIONNAIRE: Questionnaire = Questionnaire {
    questions: &[
        Question {
            id: 1,
            title: "Настроение конца лета",
            timing: false,
            options: &[
                QuestionOption {
                    id: 1,
                    title: "Морской бриз",
                    desc: Some("Лёгко и освежающе"),
                    image: Some("/assets/iliva.jpg"),
                    suffix: None,
                },
                QuestionOption {
                    id: 2,
                    title: "Пряности",
                    desc: Some("Насыщенно и ароматно"),
                    image: Some("/assets/karavan.jpg"),
                    suffix: None,
                },
                QuestionOption {
                    id: 3,
                    title: "Уют",
                    desc: Some("Тёплая, домашняя атмосфера"),
                    image: Some("/assets/darama.jpg"),
                    suffix: None,
                },
            ],
        },
        Question {
            id: 2,
            title: "С кем идёшь",
            timing: false,
            options: &[
                QuestionOption {
                    id: 1,
                    title: "Соло",
                    desc: Some("Никаких обязательств"),
                    image: Some("/assets/muk.jpg"),
                    suffix: None,
                },
                QuestionOption {
                    id: 2,
                    title: "С парой",
                    desc: Some("Романтика или общие планы"),
                    image: Some("/assets/gv.jpg"),
                    suffix: None,
                },
                QuestionOption {
                    id: 3,
                    title: "Компания",
                    desc: Some("Хочется делиться"),
                    image: Some("/assets/kotletabar.jpg"),
                    suffix: None,
                },
            ],
        },
        Question {
            id: 3,
            title: "Формат",
            timing: false,
            options: &[
                QuestionOption {
                    id: 1,
                    title: "Быстрый перекус",
                    desc: Some("На ходу"),
                    image: Some("/assets/bebo.jpg"),
                    suffix: None,
                },
                QuestionOption {
                    id: 2,
                    title: "Долгие посиделки",
                    desc: Some("С комфортом"),
                    image: Some("/assets/iliva.jpg"),
                    suffix: None,
                },
                QuestionOption {
                    id: 3,
                    title: "Сладкий момент",
                    desc: Some("Десерты и кофе"),
                    image: Some("/assets/vkusnoblin.jpg"),
                    suffix: None,
                },
            ],
        },
        Question {
            id: 4,
            title: "Когда планируешь зайти",
            timing: true,
            options: &[
                QuestionOption {
                    id: 1,
                    title: "Днём",
                    desc: None,
                    image: None,
                    suffix: Some(" — загляни днём"),
                },
                QuestionOption {
                    id: 2,
                    title: "Вечером",
                    desc: None,
                    image: None,
                    suffix: Some(" — идеально на вечер"),
                },
                QuestionOption {
                    id: 3,
                    title: "На выходных",
                    desc: None,
                    image: None,
                    suffix: Some(" — сохрани для выходных"),
                },
            ],
        },
    ],
};
