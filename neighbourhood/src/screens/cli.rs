use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use tokio::io::AsyncBufReadExt;
use tracing::info;

use crate::model::{PostType, RequestStatus, Role};
use crate::repositories::{NewPost, NewRequest, ProfileUpdate, SignUp};
use crate::session;
use crate::viewmodels::{
    AdminViewModel, AuthViewModel, ChatListViewModel, ChatViewModel, FeedViewModel,
    PostDetailViewModel, ProfileViewModel, RequestsViewModel, SearchViewModel,
};
use crate::App;

use super::{
    render_admin, render_chat, render_chat_list, render_feed, render_message, render_post,
    render_post_detail, render_profile, render_providers, render_requests, render_search,
};

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create an account and sign in.
    Signup {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        /// member or service_provider.
        #[arg(long, default_value = "member")]
        role: String,
        #[arg(long, default_value = "")]
        neighbourhood: String,
        /// Required for providers.
        #[arg(long)]
        service: Option<String>,
    },
    /// Sign in and remember the session.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Forget the saved session.
    Logout,
    /// Show the signed-in profile.
    Whoami,
    /// Show the newest posts.
    Feed {
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    /// Publish a post.
    Post {
        content: String,
        /// Attach an image file.
        #[arg(long)]
        image: Option<PathBuf>,
        /// Publish as an announcement (admins only).
        #[arg(long)]
        announcement: bool,
    },
    /// Show one post with its comments.
    Show { post_id: String },
    /// Like or unlike a post.
    Like { post_id: String },
    /// Comment on a post.
    Comment { post_id: String, text: String },
    /// Delete a comment.
    Uncomment { post_id: String, comment_id: String },
    /// Report a post to moderators.
    Report { post_id: String },
    /// Delete one of your posts.
    Delete { post_id: String },
    /// List conversations.
    Chats,
    /// Conversation operations.
    Chat {
        #[command(subcommand)]
        command: ChatCommand,
    },
    /// List your service requests.
    Requests,
    /// Service request operations.
    Request {
        #[command(subcommand)]
        command: RequestCommand,
    },
    /// Profile operations.
    Profile {
        #[command(subcommand)]
        command: ProfileCommand,
    },
    /// List approved providers.
    Providers {
        #[arg(long)]
        service: Option<String>,
    },
    /// Search posts and providers.
    Search { query: String },
    /// Moderation (admins only).
    Admin {
        #[command(subcommand)]
        command: AdminCommand,
    },
    /// Serve stored media over HTTP.
    Serve,
}

#[derive(Subcommand, Debug)]
pub enum ChatCommand {
    /// Open (or create) the conversation with another user.
    Open { user_id: String },
    /// Print a conversation and mark it read.
    Show { chat_id: String },
    /// Send one message.
    Send { chat_id: String, text: String },
    /// Follow a conversation live; lines typed on stdin are sent.
    Watch { chat_id: String },
}

#[derive(Subcommand, Debug)]
pub enum RequestCommand {
    /// Ask a provider for a service.
    New {
        provider_id: String,
        description: String,
        #[arg(long)]
        service: Option<String>,
    },
    /// Move a request to another status.
    Status { id: String, status: String },
}

#[derive(Subcommand, Debug)]
pub enum ProfileCommand {
    /// Show a profile (yours by default).
    Show { uid: Option<String> },
    /// Edit your profile.
    Update {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        bio: Option<String>,
        #[arg(long)]
        neighbourhood: Option<String>,
        #[arg(long)]
        service: Option<String>,
    },
    /// Upload a profile photo.
    Photo { path: PathBuf },
}

#[derive(Subcommand, Debug)]
pub enum AdminCommand {
    /// Pending providers and reported posts.
    Queue,
    Approve { uid: String },
    Reject { uid: String },
    Hide { post_id: String },
    Unhide { post_id: String },
    /// Clear reports without hiding.
    Dismiss { post_id: String },
    Delete { post_id: String },
    Disable { uid: String },
    Enable { uid: String },
}

fn check(error: Option<String>) -> Result<()> {
    match error {
        Some(e) => Err(anyhow::anyhow!(e)),
        None => Ok(()),
    }
}

fn read_file(path: &PathBuf) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

/// Run one command against `app`. The session has already been restored.
pub async fn run(app: &App, command: Command) -> Result<()> {
    let viewer = app.session.uid();
    let viewer = viewer.as_deref();
    match command {
        Command::Signup {
            name,
            email,
            password,
            role,
            neighbourhood,
            service,
        } => {
            let vm = AuthViewModel::new(app.auth());
            let role: Role = role.parse()?;
            let ok = vm.sign_up(SignUp {
                name,
                email,
                password,
                role,
                neighbourhood,
                service_type: service,
            });
            check(vm.state().error)?;
            if ok {
                remember(app)?;
                if let Some(profile) = vm.state().profile {
                    print!("{}", render_profile(&profile));
                }
            }
        }
        Command::Login { email, password } => {
            let vm = AuthViewModel::new(app.auth());
            vm.sign_in(&email, &password);
            check(vm.state().error)?;
            remember(app)?;
            if let Some(profile) = vm.state().profile {
                println!("Signed in as {}", profile.name);
            }
        }
        Command::Logout => {
            AuthViewModel::new(app.auth()).sign_out();
            session::clear_token(&app.config.data_dir)?;
            println!("Signed out");
        }
        Command::Whoami => match app.session.profile() {
            Some(profile) => print!("{}", render_profile(&profile)),
            None => println!("Not signed in"),
        },
        Command::Feed { pages } => {
            let vm = FeedViewModel::new(app.posts(), app.likes(), app.session.clone());
            vm.refresh();
            for _ in 1..pages {
                if vm.state().end_reached {
                    break;
                }
                vm.load_more();
            }
            let state = vm.state();
            check(state.error.clone())?;
            print!("{}", render_feed(&state, viewer));
        }
        Command::Post {
            content,
            image,
            announcement,
        } => {
            let image = image.as_ref().map(read_file).transpose()?;
            let kind = if announcement {
                PostType::Announcement
            } else {
                PostType::Post
            };
            let vm = FeedViewModel::new(app.posts(), app.likes(), app.session.clone());
            vm.create_post(NewPost {
                content,
                kind,
                image,
            });
            let state = vm.state();
            check(state.error.clone())?;
            if let Some(post) = state.posts.first() {
                print!("{}", render_post(post, viewer));
            }
        }
        Command::Show { post_id } => {
            let vm = post_detail(app, &post_id);
            vm.load();
            let state = vm.state();
            check(state.error.clone())?;
            print!("{}", render_post_detail(&state, viewer));
        }
        Command::Like { post_id } => {
            let vm = post_detail(app, &post_id);
            vm.load();
            vm.toggle_like();
            let state = vm.state();
            check(state.error.clone())?;
            if let Some(post) = &state.post {
                print!("{}", render_post(post, viewer));
            }
        }
        Command::Comment { post_id, text } => {
            let vm = post_detail(app, &post_id);
            vm.load();
            vm.add_comment(&text);
            let state = vm.state();
            check(state.error.clone())?;
            print!("{}", render_post_detail(&state, viewer));
        }
        Command::Uncomment {
            post_id,
            comment_id,
        } => {
            let vm = post_detail(app, &post_id);
            vm.load();
            vm.delete_comment(&comment_id);
            check(vm.state().error)?;
            println!("Comment deleted");
        }
        Command::Report { post_id } => {
            let vm = FeedViewModel::new(app.posts(), app.likes(), app.session.clone());
            vm.report(&post_id);
            check(vm.state().error)?;
            println!("Reported");
        }
        Command::Delete { post_id } => {
            let vm = FeedViewModel::new(app.posts(), app.likes(), app.session.clone());
            vm.delete(&post_id);
            check(vm.state().error)?;
            println!("Post deleted");
        }
        Command::Chats => {
            let me = app.session.require()?;
            let vm = ChatListViewModel::new(app.chat(), app.session.clone());
            vm.load();
            let state = vm.state();
            check(state.error.clone())?;
            print!("{}", render_chat_list(&state, &me.uid));
        }
        Command::Chat { command } => run_chat(app, command).await?,
        Command::Requests => {
            let vm = RequestsViewModel::new(app.requests());
            vm.load();
            let state = vm.state();
            check(state.error.clone())?;
            print!("{}", render_requests(&state));
        }
        Command::Request { command } => {
            let vm = RequestsViewModel::new(app.requests());
            match command {
                RequestCommand::New {
                    provider_id,
                    description,
                    service,
                } => {
                    vm.create(NewRequest {
                        provider_id,
                        service_type: service,
                        description,
                    });
                }
                RequestCommand::Status { id, status } => {
                    let status: RequestStatus = status.parse()?;
                    vm.load();
                    vm.update_status(&id, status);
                }
            }
            let state = vm.state();
            check(state.error.clone())?;
            print!("{}", render_requests(&state));
        }
        Command::Profile { command } => {
            let vm = ProfileViewModel::new(app.profiles());
            match command {
                ProfileCommand::Show { uid } => {
                    let uid = match uid {
                        Some(uid) => uid,
                        None => app.session.require()?.uid,
                    };
                    vm.load(&uid);
                }
                ProfileCommand::Update {
                    name,
                    bio,
                    neighbourhood,
                    service,
                } => vm.update(ProfileUpdate {
                    name,
                    bio,
                    neighbourhood,
                    service_type: service,
                }),
                ProfileCommand::Photo { path } => vm.upload_photo(&read_file(&path)?),
            }
            let state = vm.state();
            check(state.error.clone())?;
            if let Some(profile) = &state.profile {
                print!("{}", render_profile(profile));
            }
        }
        Command::Providers { service } => {
            let vm = ProfileViewModel::new(app.profiles());
            vm.load_providers(service.as_deref());
            let state = vm.state();
            check(state.error.clone())?;
            print!("{}", render_providers(&state.providers));
        }
        Command::Search { query } => {
            let vm = SearchViewModel::new(app.search());
            vm.search(&query);
            let state = vm.state();
            check(state.error.clone())?;
            print!("{}", render_search(&state, viewer));
        }
        Command::Admin { command } => run_admin(app, command)?,
        Command::Serve => {
            let bind: SocketAddr = app
                .config
                .media_bind
                .parse()
                .with_context(|| format!("invalid bind address {}", app.config.media_bind))?;
            tokio::select! {
                served = docstore::serve_media(bind, app.backend.storage.clone()) => served?,
                _ = tokio::signal::ctrl_c() => info!("shutting down"),
            }
        }
    }
    Ok(())
}

fn remember(app: &App) -> Result<()> {
    if let Some(token) = app.session.token() {
        session::save_token(&app.config.data_dir, &token)?;
    }
    Ok(())
}

fn post_detail(app: &App, post_id: &str) -> PostDetailViewModel {
    PostDetailViewModel::new(post_id, app.posts(), app.likes(), app.comments())
}

fn chat_view(app: &App, chat_id: &str) -> ChatViewModel {
    ChatViewModel::new(
        chat_id,
        app.chat(),
        app.session.clone(),
        app.typing(),
        app.config.typing_timeout,
    )
}

async fn run_chat(app: &App, command: ChatCommand) -> Result<()> {
    let me = app.session.require()?;
    match command {
        ChatCommand::Open { user_id } => {
            let thread = app.chat().get_or_create_thread(&user_id)?;
            println!("{}", thread.id);
        }
        ChatCommand::Show { chat_id } => {
            let vm = chat_view(app, &chat_id);
            vm.open();
            let state = vm.state();
            check(state.error.clone())?;
            print!("{}", render_chat(&state, &me.uid));
        }
        ChatCommand::Send { chat_id, text } => {
            let vm = chat_view(app, &chat_id);
            vm.open();
            vm.on_input_changed(&text);
            vm.send();
            check(vm.state().error)?;
        }
        ChatCommand::Watch { chat_id } => {
            let vm = chat_view(app, &chat_id);
            vm.open();
            let state = vm.state();
            check(state.error.clone())?;
            print!("{}", render_chat(&state, &me.uid));
            let mut shown = state.messages.len();
            let mut typing = state.typing_names.clone();

            let _listener = vm.listen()?;
            let mut rx = vm.subscribe();
            let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
            loop {
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let state = rx.borrow().clone();
                        for message in state.messages.iter().skip(shown) {
                            print!("{}", render_message(&state, message, &me.uid));
                        }
                        shown = shown.max(state.messages.len());
                        if state.typing_names != typing {
                            typing = state.typing_names.clone();
                            if !typing.is_empty() {
                                println!("{} typing…", typing.join(", "));
                            }
                        }
                    }
                    line = lines.next_line() => match line? {
                        Some(text) => {
                            vm.on_input_changed(&text);
                            vm.send();
                        }
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
    }
    Ok(())
}

fn run_admin(app: &App, command: AdminCommand) -> Result<()> {
    let vm = AdminViewModel::new(app.admin());
    let repo = app.admin();
    match command {
        AdminCommand::Queue => vm.load(),
        AdminCommand::Approve { uid } => vm.approve(&uid),
        AdminCommand::Reject { uid } => vm.reject(&uid),
        AdminCommand::Hide { post_id } => vm.hide(&post_id),
        AdminCommand::Unhide { post_id } => {
            repo.set_hidden(&post_id, false)?;
            vm.load();
        }
        AdminCommand::Dismiss { post_id } => vm.dismiss(&post_id),
        AdminCommand::Delete { post_id } => vm.delete_post(&post_id),
        AdminCommand::Disable { uid } => {
            repo.set_disabled(&uid, true)?;
            vm.load();
        }
        AdminCommand::Enable { uid } => {
            repo.set_disabled(&uid, false)?;
            vm.load();
        }
    }
    let state = vm.state();
    check(state.error.clone())?;
    print!("{}", render_admin(&state));
    Ok(())
}
