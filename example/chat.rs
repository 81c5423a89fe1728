//! minimal chat page over an openai-compatible endpoint.
//! - config from env / `.env` (`NVIDIA_API_KEY` required), optional json
//!   overlay via `CHAT_CONFIG`.
//! - the response line is *replaced* by every emission, so it always shows
//!   the whole assembled answer for the current turn.
//! - only the latest turn is visible; nothing is kept between turns.

use bevy::input::keyboard::{KeyCode, KeyboardInput};
use bevy::prelude::*;
use bevy::window::WindowPlugin;
use bevy_llm_chat::{
    BevyLlmChatPlugin, ChatCompletedEvt, ChatConfig, ChatError, ChatErrorEvt, ChatResponseEvt,
    ChatSession, ChatStarted, Clients, send_user_text,
};

// ---------------------- ui tags ----------------------

#[derive(Component)]
struct UserText;
#[derive(Component)]
struct ResponseText;
#[derive(Component)]
struct StatusText;
#[derive(Component)]
struct PromptText;

#[derive(Component, Copy, Clone)]
struct TargetSession(Entity);

// ---------------------- app state ----------------------

#[derive(Resource, Default)]
struct PromptBuf(String);

// ---------------------- main ----------------------

fn main() -> Result<(), ChatError> {
    let config = ChatConfig::load()?;
    let client = config.client()?;

    App::new()
        .insert_resource(ClearColor(Color::srgb_u8(18, 18, 20)))
        .insert_resource(Clients::new(client))
        .insert_resource(PromptBuf::default())
        .add_plugins(DefaultPlugins.set(WindowPlugin {
            primary_window: Some(Window {
                title: config.title.clone(),
                ..default()
            }),
            ..default()
        }))
        .insert_resource(config)
        .add_plugins(BevyLlmChatPlugin)
        .add_systems(Startup, setup)
        .add_systems(Update, (handle_text_input, refresh_prompt_text))
        // event readers should run after bevy_llm_chat emits events
        .add_systems(
            Update,
            (on_started, on_response, on_done, on_error).after(bevy_llm_chat::LlmSet::Drain),
        )
        .run();

    Ok(())
}

// ---------------------- setup ui ----------------------

fn setup(mut commands: Commands, config: Res<ChatConfig>) {
    commands.spawn(Camera2d);

    let session = commands.spawn(ChatSession::default()).id();

    let style_22 = TextFont { font_size: 22.0, ..default() };
    let style_18 = TextFont { font_size: 18.0, ..default() };
    let style_14 = TextFont { font_size: 14.0, ..default() };

    commands
        .spawn((
            Node {
                width: Val::Percent(100.0),
                height: Val::Percent(100.0),
                flex_direction: FlexDirection::Column,
                row_gap: Val::Px(8.0),
                padding: UiRect::all(Val::Px(12.0)),
                ..default()
            },
            BackgroundColor(Color::NONE),
        ))
        .with_children(|p| {
            p.spawn((Text::new(config.title.clone()), style_22, TextColor(Color::WHITE)));

            // conversation box: latest turn only
            p.spawn((
                Node {
                    width: Val::Percent(100.0),
                    flex_grow: 1.0,
                    flex_direction: FlexDirection::Column,
                    row_gap: Val::Px(8.0),
                    padding: UiRect::all(Val::Px(8.0)),
                    ..default()
                },
                BackgroundColor(Color::srgb(0.10, 0.10, 0.12)),
            ))
            .with_children(|c| {
                c.spawn((
                    Text::new(""),
                    style_18.clone(),
                    TextColor(Color::WHITE),
                    UserText,
                    TargetSession(session),
                ));
                c.spawn((
                    Text::new(""),
                    style_18.clone(),
                    TextColor(Color::srgb_u8(200, 200, 200)),
                    ResponseText,
                    TargetSession(session),
                ));
            });

            p.spawn((
                Text::new(""),
                style_14.clone(),
                TextColor(Color::srgb_u8(140, 140, 150)),
                StatusText,
                TargetSession(session),
            ));
            p.spawn((
                Text::new("> "),
                style_14,
                TextColor(Color::WHITE),
                PromptText,
                TargetSession(session),
            ));
        });
}

// ---------------------- input ----------------------

fn handle_text_input(
    mut commands: Commands,
    mut ev_kbd: EventReader<KeyboardInput>,
    keys: Res<ButtonInput<KeyCode>>,
    mut prompt: ResMut<PromptBuf>,
    q_prompt_target: Query<&TargetSession, With<PromptText>>,
    mut q_user: Query<(&TargetSession, &mut Text), With<UserText>>,
) {
    for ev in ev_kbd.read() {
        if ev.state.is_pressed()
            && let Some(txt) = &ev.text {
                let s = txt.replace(['\r', '\n'], "");
                prompt.0.push_str(&s);
        }
    }

    if keys.just_pressed(KeyCode::Backspace) {
        prompt.0.pop();
    }

    if keys.just_pressed(KeyCode::Enter)
        && let Ok(TargetSession(e)) = q_prompt_target.single()
        && !prompt.0.trim().is_empty() {
            let msg = std::mem::take(&mut prompt.0);
            for (TargetSession(t), mut u) in q_user.iter_mut() {
                if *t == *e {
                    u.0 = format!("you: {msg}");
                }
            }
            send_user_text(&mut commands, *e, msg);
    }
}

fn refresh_prompt_text(
    prompt: Res<PromptBuf>,
    mut q_prompt: Query<&mut Text, With<PromptText>>,
) {
    if prompt.is_changed()
        && let Ok(mut t) = q_prompt.single_mut() {
            t.0 = format!("> {} |", prompt.0);
    }
}

// ---------------------- chat events ----------------------

fn on_started(
    mut ev: EventReader<ChatStarted>,
    mut q_response: Query<(&TargetSession, &mut Text), (With<ResponseText>, Without<StatusText>)>,
    mut q_status: Query<(&TargetSession, &mut Text), With<StatusText>>,
) {
    for ChatStarted { entity, turn } in ev.read() {
        debug!(target: "chat_page", "turn {} started (entity={:?})", turn, entity);
        // new turn: previous response goes away
        for (TargetSession(t), mut r) in q_response.iter_mut() {
            if t == entity {
                r.0.clear();
            }
        }
        for (TargetSession(t), mut s) in q_status.iter_mut() {
            if t == entity {
                s.0 = "thinking...".to_string();
            }
        }
    }
}

fn on_response(
    mut ev: EventReader<ChatResponseEvt>,
    config: Res<ChatConfig>,
    mut q: Query<(&TargetSession, &mut Text), With<ResponseText>>,
) {
    for ChatResponseEvt { entity, text } in ev.read() {
        for (TargetSession(t), mut r) in q.iter_mut() {
            if t == entity {
                r.0 = format!("{}: {}", config.bot_user, text);
            }
        }
    }
}

fn on_done(
    mut ev: EventReader<ChatCompletedEvt>,
    mut q_status: Query<(&TargetSession, &mut Text), With<StatusText>>,
) {
    for ChatCompletedEvt { entity, final_text, fragments } in ev.read() {
        info!(
            target: "chat_page",
            "turn done (entity={:?}): fragments={} len={}",
            entity, fragments, final_text.as_deref().map_or(0, str::len)
        );
        for (TargetSession(t), mut s) in q_status.iter_mut() {
            if t == entity {
                s.0.clear();
            }
        }
    }
}

fn on_error(
    mut ev: EventReader<ChatErrorEvt>,
    mut q_status: Query<(&TargetSession, &mut Text), With<StatusText>>,
) {
    // the response line already shows the fixed user message
    for ChatErrorEvt { entity, error } in ev.read() {
        warn!(target: "chat_page", "turn failed (entity={:?}): {}", entity, error);
        for (TargetSession(t), mut s) in q_status.iter_mut() {
            if t == entity {
                s.0.clear();
            }
        }
    }
}
