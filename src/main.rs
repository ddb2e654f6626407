use std::sync::Arc;
use std::time::Duration;

use corner_quiz_bot::config::Config;
use corner_quiz_bot::quiz::{
    cache::ListCache,
    machine::{Outcome, QuizError, QuizMachine, QuizState},
    payload::{PayloadSlot, ResultPayload, RESULT_KEY},
    resolve::ResolutionEngine,
    source::HttpListSource,
    store::{JsonFileStore, MemoryStore, SessionStore},
    QUESTIONNAIRE,
};
use dotenv::dotenv;
use log::{info, warn};
use teloxide::{
    dispatching::dialogue::{serializer::Json, ErasedStorage, SqliteStorage, Storage},
    prelude::*,
    types::{ChatAction, InputFile, KeyboardButton, KeyboardMarkup, ParseMode},
    utils::html,
};

type QuizDialogue = Dialogue<State, ErasedStorage<State>>;
type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;
type DialogueStorage = std::sync::Arc<ErasedStorage<State>>;

#[derive(Clone, Default, serde::Serialize, serde::Deserialize)]
pub enum State {
    #[default]
    Start,
    Quiz {
        quiz: QuizState,
    },
    Result,
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    pretty_env_logger::init();
    log::info!("Starting corner quiz bot...");

    let config = Arc::new(Config::from_env().expect("Invalid configuration"));
    let bot = Bot::from_env();

    info!("Opening dialogue storage at {}", config.dialogue_db);
    let storage: DialogueStorage = SqliteStorage::open(&config.dialogue_db, Json)
        .await
        .expect("Failed to open dialogue storage")
        .erase();

    let session: Arc<dyn SessionStore> = match &config.store_path {
        Some(path) => match JsonFileStore::open(path) {
            Ok(store) => Arc::new(store),
            Err(err) => {
                warn!("Session store unavailable ({}), keeping the session in memory", err);
                Arc::new(MemoryStore::new())
            }
        },
        None => Arc::new(MemoryStore::new()),
    };

    let source =
        Arc::new(HttpListSource::new(config.fetch_timeout).expect("Failed to build HTTP client"));
    let cache = Arc::new(ListCache::new(
        config.list_urls.clone(),
        source,
        session.clone(),
    ));
    let _prefetch = cache.spawn_prefetch();
    let engine = Arc::new(ResolutionEngine::new(cache));

    Dispatcher::builder(
        bot,
        Update::filter_message()
            .enter_dialogue::<Message, ErasedStorage<State>, State>()
            .branch(dptree::case![State::Start].endpoint(start))
            .branch(dptree::case![State::Quiz { quiz }].endpoint(quiz_step))
            .branch(dptree::case![State::Result].endpoint(show_result)),
    )
    .dependencies(dptree::deps![storage, engine, session, config])
    .enable_ctrlc_handler()
    .build()
    .dispatch()
    .await;
}

const GREETING_TEXT: &str = "Привет! Ответь на четыре вопроса, и мы подберём тебе уголок Terminal F.";
const START_BUTTON: &str = "Начать квиз";
const BACK_BUTTON: &str = "← Назад";
const NEXT_BUTTON: &str = "Далее";
const SHOW_RESULT_BUTTON: &str = "Показать результат";
const AGAIN_BUTTON: &str = "Пройти ещё раз";
const UNANSWERED_PROMPT: &str = "Пожалуйста, выберите вариант ответа.";
// How long a fallback result waits for the background list load
const READY_WAIT: Duration = Duration::from_secs(3);

fn result_slot(chat: ChatId, store: Arc<dyn SessionStore>) -> PayloadSlot {
    PayloadSlot::with_key(store, format!("{}:{}", chat.0, RESULT_KEY))
}

async fn send_greeting(bot: &Bot, chat: ChatId) -> HandlerResult {
    bot.send_message(chat, GREETING_TEXT)
        .reply_markup(KeyboardMarkup::new(vec![vec![KeyboardButton::new(START_BUTTON)]]))
        .await?;
    Ok(())
}

async fn start(
    bot: Bot,
    dialogue: QuizDialogue,
    msg: Message,
    engine: Arc<ResolutionEngine>,
    session: Arc<dyn SessionStore>,
) -> HandlerResult {
    if msg.text() != Some(START_BUTTON) {
        return send_greeting(&bot, msg.chat.id).await;
    }

    // Fetching the primary list may take a moment
    let _ = bot.send_chat_action(msg.chat.id, ChatAction::Typing).await;

    let mut machine = QuizMachine::new(&QUESTIONNAIRE, engine, result_slot(msg.chat.id, session));
    match machine.start().await {
        Ok(_) => {
            let quiz = machine.into_state();
            send_question(&bot, msg.chat.id, 0, &quiz.answers).await?;
            dialogue.update(State::Quiz { quiz }).await?;
        }
        Err(err) => {
            warn!("[quiz] could not start: {}", err);
            bot.send_message(msg.chat.id, "Квиз сейчас недоступен, попробуй позже.")
                .await?;
        }
    }
    Ok(())
}

async fn send_question(bot: &Bot, chat: ChatId, step: usize, answers: &[Option<u32>]) -> HandlerResult {
    let Some(question) = QUESTIONNAIRE.question(step) else {
        return Ok(());
    };

    let mut text = format!(
        "Вопрос {} из {}\n<b>{}</b>",
        step + 1,
        QUESTIONNAIRE.len(),
        html::escape(question.title)
    );
    if !question.timing {
        text.push_str("\nВыберите вариант");
    }
    text.push('\n');
    for option in question.options {
        match option.desc {
            Some(desc) => text.push_str(&format!("\n• {} — {}", option.title, desc)),
            None => text.push_str(&format!("\n• {}", option.title)),
        }
    }
    let chosen = answers
        .get(step)
        .copied()
        .flatten()
        .and_then(|id| question.option(id));
    if let Some(chosen) = chosen {
        text.push_str(&format!("\n\nТвой ответ: <i>{}</i>", chosen.title));
    }

    let mut rows: Vec<Vec<KeyboardButton>> = question
        .options
        .iter()
        .map(|o| vec![KeyboardButton::new(o.title)])
        .collect();
    let mut nav = Vec::new();
    if step > 0 {
        nav.push(KeyboardButton::new(BACK_BUTTON));
    }
    if step == QUESTIONNAIRE.last_step() {
        nav.push(KeyboardButton::new(SHOW_RESULT_BUTTON));
    } else {
        nav.push(KeyboardButton::new(NEXT_BUTTON));
    }
    rows.push(nav);

    bot.send_message(chat, text)
        .parse_mode(ParseMode::Html)
        .reply_markup(KeyboardMarkup::new(rows))
        .await?;
    Ok(())
}

async fn quiz_step(
    bot: Bot,
    dialogue: QuizDialogue,
    quiz: QuizState,
    msg: Message,
    engine: Arc<ResolutionEngine>,
    session: Arc<dyn SessionStore>,
    config: Arc<Config>,
) -> HandlerResult {
    let chat = msg.chat.id;
    let Some(text) = msg.text() else {
        bot.send_message(chat, UNANSWERED_PROMPT).await?;
        return Ok(());
    };

    let step = quiz.step();
    let on_last_step = step == Some(QUESTIONNAIRE.last_step());
    let mut machine = QuizMachine::resume(&QUESTIONNAIRE, quiz, engine, result_slot(chat, session));

    let outcome = match text {
        BACK_BUTTON => machine.back().await,
        NEXT_BUTTON | SHOW_RESULT_BUTTON => {
            if on_last_step {
                let _ = bot.send_chat_action(chat, ChatAction::Typing).await;
            }
            machine.next().await
        }
        text if text.starts_with("/start") => machine.restart().await,
        text => {
            let option = step
                .and_then(|s| QUESTIONNAIRE.question(s))
                .and_then(|q| q.option_by_title(text));
            match option {
                Some(option) => {
                    if on_last_step {
                        let _ = bot.send_chat_action(chat, ChatAction::Typing).await;
                    }
                    machine.choose(option.id).await
                }
                None => {
                    bot.send_message(chat, "Пожалуйста, выберите один из вариантов на клавиатуре")
                        .await?;
                    return Ok(());
                }
            }
        }
    };

    match outcome {
        Ok(Outcome::Question { step }) => {
            let quiz = machine.into_state();
            send_question(&bot, chat, step, &quiz.answers).await?;
            dialogue.update(State::Quiz { quiz }).await?;
        }
        Ok(Outcome::Completed(payload)) => {
            send_result(&bot, chat, &payload, &config).await?;
            dialogue.update(State::Result).await?;
        }
        Ok(Outcome::Idle) => {
            dialogue.update(State::Start).await?;
            send_greeting(&bot, chat).await?;
        }
        Ok(Outcome::Unchanged) => {
            let quiz = machine.into_state();
            if let Some(step) = quiz.step() {
                send_question(&bot, chat, step, &quiz.answers).await?;
            }
        }
        Err(QuizError::Unanswered { .. }) => {
            bot.send_message(chat, UNANSWERED_PROMPT).await?;
        }
        Err(err) => {
            warn!("[quiz] rejected input {:?}: {}", text, err);
            bot.send_message(chat, "Пожалуйста, выберите один из вариантов на клавиатуре")
                .await?;
        }
    }
    Ok(())
}

async fn show_result(
    bot: Bot,
    dialogue: QuizDialogue,
    msg: Message,
    engine: Arc<ResolutionEngine>,
    session: Arc<dyn SessionStore>,
    config: Arc<Config>,
) -> HandlerResult {
    let chat = msg.chat.id;
    let slot = result_slot(chat, session);

    if msg.text() == Some(AGAIN_BUTTON) {
        slot.clear();
        dialogue.update(State::Start).await?;
        return send_greeting(&bot, chat).await;
    }

    match slot.load() {
        Some(payload) => {
            if payload.is_fallback() && !engine.cache().wait_ready_for(READY_WAIT).await {
                info!("[result] lists still loading, searching them one by one");
            }
            let payload = payload.second_chance(&QUESTIONNAIRE, &engine).await;
            send_result(&bot, chat, &payload, &config).await?;
        }
        None => {
            bot.send_message(chat, "Результат не найден. Вернуться к квизу?")
                .reply_markup(KeyboardMarkup::new(vec![vec![KeyboardButton::new(START_BUTTON)]]))
                .await?;
            dialogue.update(State::Start).await?;
        }
    }
    Ok(())
}

async fn send_result(bot: &Bot, chat: ChatId, payload: &ResultPayload, config: &Config) -> HandlerResult {
    let res = &payload.result;
    let mut card = format!(
        "<b>{}</b>\n{}\n\nЦвет карточки: {}",
        html::escape(&res.corner),
        html::escape(&payload.display_text),
        html::escape(res.color_or_default())
    );
    if let Some(file) = payload.source_file() {
        card.push_str(&format!("\n<i>Found in: {}</i>", html::escape(file)));
    }
    card.push_str("\n\nTerminal F");

    info!("[result] chat {} key {} corner {}", chat.0, payload.key, res.corner);

    let keyboard = KeyboardMarkup::new(vec![vec![KeyboardButton::new(AGAIN_BUTTON)]]);

    if let Some(url) = config.asset_url(res.image_or_default()) {
        let sent = bot
            .send_photo(chat, InputFile::url(url))
            .caption(card.clone())
            .parse_mode(ParseMode::Html)
            .reply_markup(keyboard.clone())
            .await;
        match sent {
            Ok(_) => return Ok(()),
            Err(err) => warn!("[result] could not send the card image: {}", err),
        }
    }

    bot.send_message(chat, card)
        .parse_mode(ParseMode::Html)
        .reply_markup(keyboard)
        .await?;
    Ok(())
}
