//! single-page ask client built on bevy_askbot.
//! - every turn renders as a bubble; the newest one is kept in view.
//! - enter or the send button submits; both are gated while a turn is
//!   outstanding or the prompt is blank.
//! - failures show up as an assistant turn with fixed text.
//!
//! env:
//!   ASKBOT_API_URL   (default http://127.0.0.1:8000)

use bevy::input::keyboard::{KeyCode, KeyboardInput};
use bevy::prelude::*;
use bevy::ui::ScrollPosition;
use bevy_askbot::{AskSet, AskbotPlugin, ChatSession, ClientConfig, MessageAppended, Role};

// ---------------------- ui tags ----------------------

#[derive(Component)]
struct TranscriptList;
#[derive(Component)]
struct EmptyState;
#[derive(Component)]
struct BusyIndicator;
#[derive(Component)]
struct PromptText;
#[derive(Component)]
struct BtnSend;

#[derive(Component, Copy, Clone)]
struct TargetSession(Entity);

const PLACEHOLDER: &str = "ask a question...";

const BTN_IDLE: Color = Color::srgb(0.15, 0.35, 0.85);
const BTN_HOVER: Color = Color::srgb(0.20, 0.42, 0.95);
const BTN_DISABLED: Color = Color::srgb(0.25, 0.27, 0.32);

// ---------------------- main ----------------------

fn main() {
    #[cfg(target_arch = "wasm32")]
    console_error_panic_hook::set_once();

    App::new()
        .insert_resource(ClearColor(Color::srgb_u8(18, 18, 20)))
        .insert_resource(ClientConfig::from_env())
        .add_plugins(DefaultPlugins.set(WindowPlugin {
            primary_window: Some(Window {
                title: "askbot".into(),
                ..default()
            }),
            ..default()
        }))
        .add_plugins(AskbotPlugin)
        .add_systems(Startup, setup)
        .add_systems(Update, (handle_text_input, btn_send, refresh_prompt_text).before(AskSet::Drain))
        // transcript readers run after bevy_askbot applies settlements
        .add_systems(
            Update,
            (on_appended, refresh_busy_state).after(AskSet::Drain),
        )
        .run();
}

// ---------------------- setup ui ----------------------

fn setup(mut commands: Commands, cfg: Res<ClientConfig>) {
    commands.spawn(Camera2d);

    let session = commands.spawn(ChatSession::new()).id();
    info!(target: "askbot_demo", "session {:?} -> {}", session, cfg.chat_url());

    let style_20 = TextFont { font_size: 20.0, ..default() };
    let style_16 = TextFont { font_size: 16.0, ..default() };
    let style_14 = TextFont { font_size: 14.0, ..default() };

    commands
        .spawn(Node {
            width: Val::Percent(100.0),
            height: Val::Percent(100.0),
            flex_direction: FlexDirection::Column,
            ..default()
        })
        .with_children(|p| {
            // --- header ---
            p.spawn((
                Node {
                    width: Val::Percent(100.0),
                    padding: UiRect::all(Val::Px(14.0)),
                    ..default()
                },
                BackgroundColor(Color::srgb(0.10, 0.10, 0.12)),
            ))
            .with_children(|h| {
                h.spawn((Text::new("askbot"), style_20.clone(), TextColor(Color::WHITE)));
            });

            // --- transcript ---
            p.spawn((
                Node {
                    width: Val::Percent(100.0),
                    flex_grow: 1.0,
                    flex_direction: FlexDirection::Column,
                    row_gap: Val::Px(10.0),
                    padding: UiRect::all(Val::Px(14.0)),
                    overflow: Overflow::scroll_y(),
                    ..default()
                },
                ScrollPosition::default(),
                TranscriptList,
                TargetSession(session),
            ))
            .with_children(|list| {
                list.spawn((
                    Node {
                        align_self: AlignSelf::Center,
                        margin: UiRect::top(Val::Px(40.0)),
                        ..default()
                    },
                    Text::new("ready when you are."),
                    style_16.clone(),
                    TextColor(Color::srgb(0.45, 0.47, 0.52)),
                    EmptyState,
                ));
                // stays the last child; bubbles are inserted ahead of it
                list.spawn((
                    Node {
                        display: Display::None,
                        align_self: AlignSelf::FlexStart,
                        padding: UiRect::axes(Val::Px(12.0), Val::Px(6.0)),
                        ..default()
                    },
                    Text::new("thinking..."),
                    style_14.clone(),
                    TextColor(Color::srgb(0.6, 0.62, 0.68)),
                    BusyIndicator,
                ));
            });

            // --- input row ---
            p.spawn((
                Node {
                    width: Val::Percent(100.0),
                    column_gap: Val::Px(10.0),
                    padding: UiRect::all(Val::Px(12.0)),
                    align_items: AlignItems::Center,
                    ..default()
                },
                BackgroundColor(Color::srgb(0.10, 0.10, 0.12)),
            ))
            .with_children(|row| {
                row.spawn((
                    Node { flex_grow: 1.0, ..default() },
                    Text::new(format!("> {PLACEHOLDER}")),
                    style_16.clone(),
                    TextColor(Color::WHITE),
                    PromptText,
                    TargetSession(session),
                ));
                row.spawn((
                    Button,
                    Node {
                        width: Val::Px(80.0),
                        height: Val::Px(32.0),
                        align_items: AlignItems::Center,
                        justify_content: JustifyContent::Center,
                        ..default()
                    },
                    BackgroundColor(BTN_DISABLED),
                    BtnSend,
                    TargetSession(session),
                ))
                .with_children(|b| {
                    b.spawn((Text::new("send"), style_14.clone(), TextColor(Color::WHITE)));
                });
            });
        });
}

// ---------------------- input & buttons ----------------------

fn handle_text_input(
    mut ev_kbd: EventReader<KeyboardInput>,
    keys: Res<ButtonInput<KeyCode>>,
    q_prompt: Query<&TargetSession, With<PromptText>>,
    mut q_session: Query<&mut ChatSession>,
) {
    let Ok(TargetSession(e)) = q_prompt.single() else {
        return;
    };
    let Ok(mut session) = q_session.get_mut(*e) else {
        return;
    };

    // collect printable text; enter/backspace are handled below
    let mut typed = String::new();
    for ev in ev_kbd.read() {
        if ev.state.is_pressed()
            && let Some(txt) = &ev.text
        {
            typed.extend(txt.chars().filter(|c| !c.is_control()));
        }
    }
    if !typed.is_empty() {
        session.input_mut().push_str(&typed);
    }

    if keys.just_pressed(KeyCode::Backspace) && !session.input().is_empty() {
        session.input_mut().pop();
    }

    if keys.just_pressed(KeyCode::Enter) && session.can_submit() {
        info!(target: "askbot_demo", "enter -> submit (len={})", session.input().len());
        session.submit_input();
    }
}

fn btn_send(
    mut q: Query<(&Interaction, &TargetSession, &mut BackgroundColor), (Changed<Interaction>, With<BtnSend>)>,
    mut q_session: Query<&mut ChatSession>,
) {
    for (i, TargetSession(e), mut bg) in &mut q {
        let Ok(mut session) = q_session.get_mut(*e) else {
            continue;
        };
        if !session.can_submit() {
            bg.0 = BTN_DISABLED;
            continue;
        }
        match *i {
            Interaction::Pressed => {
                info!(target: "askbot_demo", "send clicked -> submit");
                session.submit_input();
                bg.0 = BTN_DISABLED;
            }
            Interaction::Hovered => bg.0 = BTN_HOVER,
            Interaction::None => bg.0 = BTN_IDLE,
        }
    }
}

// ---------------------- text refresh ----------------------

fn refresh_prompt_text(
    q_session: Query<&ChatSession, Changed<ChatSession>>,
    mut q_prompt: Query<(&TargetSession, &mut Text), With<PromptText>>,
) {
    for (TargetSession(e), mut t) in &mut q_prompt {
        if let Ok(session) = q_session.get(*e) {
            // caret marks the focused prompt
            t.0 = if session.input().is_empty() {
                format!("> {PLACEHOLDER}")
            } else {
                format!("> {} |", session.input())
            };
        }
    }
}

fn refresh_busy_state(
    q_session: Query<&ChatSession, Changed<ChatSession>>,
    mut q_busy: Query<&mut Node, With<BusyIndicator>>,
    mut q_btn: Query<(&TargetSession, &Interaction, &mut BackgroundColor), With<BtnSend>>,
) {
    for (TargetSession(e), i, mut bg) in &mut q_btn {
        let Ok(session) = q_session.get(*e) else {
            continue;
        };
        bg.0 = match (session.can_submit(), *i) {
            (false, _) => BTN_DISABLED,
            (true, Interaction::Hovered | Interaction::Pressed) => BTN_HOVER,
            (true, Interaction::None) => BTN_IDLE,
        };
        for mut node in &mut q_busy {
            node.display = if session.is_busy() { Display::Flex } else { Display::None };
        }
    }
}

// ---------------------- transcript ----------------------

/// mirror each appended message as a bubble, then scroll to it.
fn on_appended(
    mut commands: Commands,
    mut ev: EventReader<MessageAppended>,
    q_session: Query<&ChatSession>,
    mut q_list: Query<(Entity, &TargetSession, &mut ScrollPosition), With<TranscriptList>>,
    mut q_empty: Query<&mut Node, With<EmptyState>>,
) {
    let style = TextFont { font_size: 16.0, ..default() };
    for MessageAppended { entity, index, role } in ev.read() {
        let Ok(session) = q_session.get(*entity) else {
            continue;
        };
        let Some(msg) = session.transcript().snapshot().get(*index) else {
            continue;
        };
        for mut node in &mut q_empty {
            node.display = Display::None;
        }

        let (align, bg, fg) = match role {
            Role::User => (AlignSelf::FlexEnd, Color::srgb(0.15, 0.35, 0.85), Color::WHITE),
            Role::Assistant => (AlignSelf::FlexStart, Color::srgb(0.16, 0.17, 0.20), Color::srgb_u8(220, 220, 225)),
        };

        for (list, TargetSession(t), mut scroll) in &mut q_list {
            if *t != *entity {
                continue;
            }
            let bubble = commands
                .spawn((
                    Node {
                        align_self: align,
                        max_width: Val::Percent(70.0),
                        padding: UiRect::all(Val::Px(12.0)),
                        ..default()
                    },
                    BackgroundColor(bg),
                    BorderRadius::all(Val::Px(12.0)),
                ))
                .with_children(|b| {
                    b.spawn((Text::new(msg.content()), style.clone(), TextColor(fg)));
                })
                .id();
            // child 0 is the empty-state line, so message i sits at i + 1
            commands.entity(list).insert_children(*index + 1, &[bubble]);
            // layout clamps this to the real content height
            scroll.offset_y = f32::MAX;
        }
    }
}
