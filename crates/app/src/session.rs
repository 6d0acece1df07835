use jukebox_core::format::{progress_bar, seconds_to_timestamp};
use jukebox_core::{AppConfig, ChannelId, ParticipantId, Permissions, QueueEntity};
use jukebox_engine::{
    classify, skip_bypass, BypassReason, DispatchError, FetchDispatcher, FetchOutcome,
    FetchRequest, GatedAction, PlayerClosed, PlayerEvent, PlayerHandle, QueryKind, Resolution,
    ResolutionError, SkipBypassPolicy, VoteCoordinator,
};
use jukebox_providers::PlaybackSink;
use std::collections::BTreeSet;
use tracing::{debug, info};

const QUEUE_LISTING_LIMIT: usize = 15;

pub trait ChatGateway: Send {
    fn send_message(&mut self, channel: &ChannelId, text: &str);
    fn send_error(&mut self, channel: &ChannelId, text: &str);
    fn set_listening_to(&mut self, title: Option<&str>);
}

pub type SinkFactory = Box<dyn FnMut() -> Box<dyn PlaybackSink> + Send>;

#[derive(Debug, Clone)]
pub struct Incoming {
    pub author: ParticipantId,
    pub roles: Vec<String>,
    pub channel: ChannelId,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VolumeInput {
    NotANumber,
    OutOfRange(f32),
}

pub fn parse_volume(arg: &str, current: f32) -> Result<f32, VolumeInput> {
    let arg = arg.trim();
    let value: f32 = arg.parse().map_err(|_| VolumeInput::NotANumber)?;
    let mut volume = value / 100.0;
    if arg.starts_with('+') || volume < 0.0 {
        volume += current;
    }
    if volume > 0.0 && volume <= 1.0 {
        Ok(volume)
    } else {
        Err(VolumeInput::OutOfRange(volume))
    }
}

pub struct Session<G: ChatGateway> {
    cfg: AppConfig,
    gateway: G,
    player: PlayerHandle,
    votes: VoteCoordinator,
    fetch: FetchDispatcher,
    permissions: Permissions,
    sink_factory: SinkFactory,
    listeners: BTreeSet<ParticipantId>,
    connected: bool,
}

impl<G: ChatGateway> Session<G> {
    pub fn new(
        cfg: AppConfig,
        gateway: G,
        player: PlayerHandle,
        fetch: FetchDispatcher,
        sink_factory: SinkFactory,
    ) -> Self {
        let permissions = Permissions::from_config(&cfg.permissions);
        Self {
            cfg,
            gateway,
            player,
            votes: VoteCoordinator::new(),
            fetch,
            permissions,
            sink_factory,
            listeners: BTreeSet::new(),
            connected: false,
        }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn idle_presence(&self) -> String {
        format!("{}play", self.cfg.command_prefix)
    }

    pub fn start(&mut self) {
        let idle = self.idle_presence();
        self.gateway.set_listening_to(Some(&idle));
    }

    pub async fn handle_message(&mut self, msg: Incoming) -> Result<Flow, PlayerClosed> {
        let Some(command) = msg.content.strip_prefix(self.cfg.command_prefix.as_str()) else {
            return Ok(Flow::Continue);
        };
        let command = command.trim();
        let (name, arg) = match command.split_once(char::is_whitespace) {
            Some((name, rest)) => (name.to_lowercase(), rest.trim().to_string()),
            None => (command.to_lowercase(), String::new()),
        };

        match name.as_str() {
            "shutdown" => {
                if !self.require_owner(&msg) {
                    return Ok(Flow::Continue);
                }
                self.gateway.send_message(&msg.channel, "Shutting down...");
                info!("shutdown requested");
                self.player.detach_sink().await?;
                self.gateway.set_listening_to(None);
                return Ok(Flow::Shutdown);
            }
            "summon" | "join" => self.join(&msg).await?,
            "leave" => self.leave(&msg).await?,
            "volume" => {
                if arg.is_empty() {
                    let volume = self.player.snapshot().await?.volume;
                    self.gateway.send_message(
                        &msg.channel,
                        &format!("Current volume is {:.1}", volume * 100.0),
                    );
                } else {
                    self.change_volume(&arg, &msg.channel).await?;
                }
            }
            _ if looks_like_volume(&name) => self.change_volume(&name, &msg.channel).await?,
            "skip" => {
                if !self.connected || !self.player.is_playing().await? {
                    self.gateway.send_error(&msg.channel, "Nothing is currently playing!");
                } else if self.require_listener(&msg) {
                    self.skip_democratic(&msg.author, &msg.channel).await?;
                }
            }
            "clear" => {
                if !self.connected {
                    self.gateway.send_error(&msg.channel, "Nothing is currently playing!");
                } else if self.require_listener(&msg) {
                    self.clear_democratic(&msg.author, &msg.channel).await?;
                }
            }
            "forceskip" => {
                if self.require_owner(&msg) {
                    self.skip_now().await?;
                }
            }
            "forceclear" => {
                if self.require_owner(&msg) {
                    let cleared = self.clear_now().await?;
                    self.gateway
                        .send_message(&msg.channel, &format!("Cleared {cleared} songs."));
                }
            }
            "queue" => {
                let listing = self.queue_listing().await?;
                self.gateway.send_message(&msg.channel, &listing);
            }
            "np" | "song" => {
                let card = self.now_playing_card().await?;
                self.gateway.send_message(&msg.channel, &card);
            }
            "shuffle" => {
                self.player.shuffle_queue().await?;
                self.gateway.send_message(&msg.channel, "Queue shuffled!");
            }
            "play" => self.play(&msg, &arg),
            other => debug!(command = other, "ignoring unknown command"),
        }
        Ok(Flow::Continue)
    }

    pub async fn handle_fetch(&mut self, outcome: FetchOutcome) -> Result<(), PlayerClosed> {
        let FetchOutcome { request, result } = outcome;
        match result {
            Ok(Resolution::Single(item)) => self.enqueue_single(item, &request.channel).await,
            Ok(Resolution::Batch(batch)) => {
                let added = batch.items.len();
                let total: u64 = batch.items.iter().map(|i| i.length_seconds).sum();
                if added > 0 {
                    self.player.enqueue_many(batch.items).await?;
                }
                let mut text = format!(
                    "Successfully added {added} songs to the queue for a total play time of {}.",
                    seconds_to_timestamp(total)
                );
                if batch.skipped > 0 {
                    text.push_str(&format!(" {} skipped.", batch.skipped));
                }
                self.gateway.send_message(&request.channel, &text);
                Ok(())
            }
            Err(ResolutionError::NoResults(term)) => {
                self.gateway.send_error(
                    &request.channel,
                    &format!("No results for search term: `{term}`"),
                );
                Ok(())
            }
            Err(err) => {
                self.gateway.send_error(
                    &request.channel,
                    &format!("{err}\nInput: `{}`", request.query),
                );
                Ok(())
            }
        }
    }

    pub fn handle_player_event(&mut self, event: PlayerEvent) {
        match event {
            PlayerEvent::CurrentChanged(None) => {
                self.votes.on_current_changed(true);
                let idle = self.idle_presence();
                self.gateway.set_listening_to(Some(&idle));
            }
            PlayerEvent::CurrentChanged(Some(item)) => {
                self.votes.on_current_changed(false);
                let mut text = format!("**{}** is now playing!", item.display_title);
                if self.cfg.preferences.mention_playing {
                    if let Some(requester) = &item.requester {
                        text = format!("@{requester}, {text}");
                    }
                }
                if let Some(channel) = &item.origin_channel {
                    self.gateway.send_message(channel, &text);
                }
                self.gateway.set_listening_to(Some(&item.display_title));
            }
            PlayerEvent::StartFailed { item, error } => {
                if let Some(channel) = &item.origin_channel {
                    self.gateway.send_error(
                        channel,
                        &format!("Could not play **{}**: {error}", item.display_title),
                    );
                }
            }
            PlayerEvent::StreamFailed { item, reason } => {
                if let Some(channel) = &item.origin_channel {
                    self.gateway.send_error(
                        channel,
                        &format!("Playback of **{}** stopped: {reason}", item.display_title),
                    );
                }
            }
        }
    }

    async fn join(&mut self, msg: &Incoming) -> Result<(), PlayerClosed> {
        self.listeners.insert(msg.author.clone());
        if !self.connected {
            let sink = (self.sink_factory)();
            self.player.attach_sink(sink).await?;
            self.connected = true;
            info!("session connected");
        }
        self.gateway.send_message(
            &msg.channel,
            &format!("{} joined. {} listening.", msg.author, self.listeners.len()),
        );
        Ok(())
    }

    async fn leave(&mut self, msg: &Incoming) -> Result<(), PlayerClosed> {
        if !self.listeners.remove(&msg.author) {
            return Ok(());
        }
        self.gateway.send_message(
            &msg.channel,
            &format!("{} left. {} listening.", msg.author, self.listeners.len()),
        );
        if self.listeners.is_empty() && self.connected {
            self.player.detach_sink().await?;
            self.connected = false;
            info!("session disconnected; nobody is listening");
        }
        Ok(())
    }

    fn play(&mut self, msg: &Incoming, arg: &str) {
        if !self.connected {
            self.gateway.send_error(&msg.channel, "You must summon me first!");
            return;
        }
        if !self.require_listener(msg) {
            return;
        }
        if arg.is_empty() {
            let usage = format!("Usage: {}play <URL or search term>", self.cfg.command_prefix);
            self.gateway.send_error(&msg.channel, &usage);
            return;
        }

        let request = FetchRequest {
            requester: msg.author.clone(),
            channel: msg.channel.clone(),
            query: arg.to_string(),
        };
        match self.fetch.dispatch(request) {
            Ok(()) => {
                if classify(arg) == QueryKind::PlaylistLink {
                    self.gateway.send_message(&msg.channel, "Processing playlist...");
                }
            }
            Err(DispatchError::Saturated(limit)) => self.gateway.send_error(
                &msg.channel,
                &format!("Already resolving {limit} requests, try again shortly."),
            ),
        }
    }

    async fn enqueue_single(&mut self, item: QueueEntity, channel: &ChannelId) -> Result<(), PlayerClosed> {
        let max = self.cfg.preferences.max_song_length;
        if max > 0 && item.length_seconds > max as u64 {
            self.gateway.send_error(
                channel,
                &format!(
                    "Song too long! ({}, limit is {})",
                    seconds_to_timestamp(item.length_seconds),
                    seconds_to_timestamp(max as u64)
                ),
            );
            return Ok(());
        }
        let title = item.display_title.clone();
        let wait = self.player.enqueue(item).await?;
        if wait > 0 {
            self.gateway.send_message(
                channel,
                &format!("Enqueued **{title}**, ETA: {}", seconds_to_timestamp(wait)),
            );
        }
        Ok(())
    }

    async fn skip_democratic(&mut self, voter: &ParticipantId, channel: &ChannelId) -> Result<(), PlayerClosed> {
        let Some(now) = self.player.snapshot().await?.current else {
            self.gateway.send_error(channel, "Nothing is currently playing!");
            return Ok(());
        };
        let policy = SkipBypassPolicy {
            self_insta_skip: self.cfg.votes.self_insta_skip,
            pass_after_secs: self.cfg.votes.pass_skip_vote_after,
        };
        match skip_bypass(policy, voter, &now.item, now.elapsed) {
            Some(BypassReason::Requester) => {
                self.gateway.send_message(channel, "Skipping...");
                return self.skip_now().await;
            }
            Some(BypassReason::GracePeriodElapsed) => {
                self.gateway.send_message(
                    channel,
                    "Vote passed because enough time had passed. Skipping...",
                );
                return self.skip_now().await;
            }
            None => {}
        }

        self.votes.bind_skip_target(now.play_id);
        let remaining = self.votes.register_with(
            GatedAction::Skip,
            voter.clone(),
            self.listeners.len(),
            &self.cfg.votes.skip,
        );
        if remaining <= 0 {
            self.gateway.send_message(channel, "Vote passed. Skipping...");
            self.skip_now().await
        } else {
            self.gateway.send_message(
                channel,
                &format!("@{voter}, vote registered. {remaining} more votes needed to skip."),
            );
            Ok(())
        }
    }

    async fn clear_democratic(&mut self, voter: &ParticipantId, channel: &ChannelId) -> Result<(), PlayerClosed> {
        let remaining = self.votes.register_with(
            GatedAction::Clear,
            voter.clone(),
            self.listeners.len(),
            &self.cfg.votes.clear,
        );
        if remaining <= 0 {
            let cleared = self.clear_now().await?;
            self.gateway
                .send_message(channel, &format!("Vote passed. Cleared {cleared} songs."));
        } else {
            self.gateway.send_message(
                channel,
                &format!("@{voter}, vote registered. {remaining} more votes needed to clear."),
            );
        }
        Ok(())
    }

    async fn skip_now(&mut self) -> Result<(), PlayerClosed> {
        self.votes.reset(GatedAction::Skip);
        self.player.advance().await
    }

    async fn clear_now(&mut self) -> Result<usize, PlayerClosed> {
        self.votes.reset(GatedAction::Clear);
        self.player.clear_queue().await
    }

    async fn change_volume(&mut self, arg: &str, channel: &ChannelId) -> Result<(), PlayerClosed> {
        let current = self.player.snapshot().await?.volume;
        match parse_volume(arg, current) {
            Ok(volume) => match self.player.set_volume(volume).await? {
                Ok(()) => self.gateway.send_message(
                    channel,
                    &format!(
                        "Changed volume from {:.1} to {:.1}",
                        current * 100.0,
                        volume * 100.0
                    ),
                ),
                Err(err) => self.gateway.send_error(channel, &err.to_string()),
            },
            Err(VolumeInput::OutOfRange(volume)) => self.gateway.send_error(
                channel,
                &format!("Volume {:.1} out of range: 1-100", volume * 100.0),
            ),
            Err(VolumeInput::NotANumber) => {
                self.gateway
                    .send_error(channel, &format!("`{arg}` is not a number"));
            }
        }
        Ok(())
    }

    async fn queue_listing(&self) -> Result<String, PlayerClosed> {
        let snapshot = self.player.snapshot().await?;
        if snapshot.queued.is_empty() {
            return Ok(format!(
                "No songs in the queue!\nQueue something with {}play",
                self.cfg.command_prefix
            ));
        }
        let mut text = String::from("Queue\n");
        for (index, item) in snapshot.queued.iter().take(QUEUE_LISTING_LIMIT).enumerate() {
            let by = item
                .requester
                .as_ref()
                .map(|r| r.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            text.push_str(&format!("{}. **{}** by {by}\n", index + 1, item.display_title));
        }
        if snapshot.queued.len() > QUEUE_LISTING_LIMIT {
            text.push_str(&format!(
                "And {} more...\n",
                snapshot.queued.len() - QUEUE_LISTING_LIMIT
            ));
        }
        let next_in = snapshot
            .current
            .as_ref()
            .map(|now| now.item.length_seconds.saturating_sub(now.elapsed))
            .unwrap_or(0);
        text.push_str(&format!("Next song in {}", seconds_to_timestamp(next_in)));
        Ok(text)
    }

    async fn now_playing_card(&self) -> Result<String, PlayerClosed> {
        let Some(now) = self.player.snapshot().await?.current else {
            return Ok(format!(
                "Nothing currently playing!\nQueue something with {}play",
                self.cfg.command_prefix
            ));
        };
        let item = &now.item;
        let fraction = if item.length_seconds > 0 {
            now.elapsed as f64 / item.length_seconds as f64
        } else {
            0.0
        };
        let by = item
            .requester
            .as_ref()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let mut card = format!(
            "{}\nby {by}\n{}\n[{}/{}]",
            item.display_title,
            progress_bar(fraction, 20),
            seconds_to_timestamp(now.elapsed),
            seconds_to_timestamp(item.length_seconds)
        );
        if let Some(url) = &item.canonical_url {
            card.push('\n');
            card.push_str(url);
        }
        if let Some(art) = &item.artwork_url {
            card.push_str(&format!("\nArtwork: {art}"));
        }
        Ok(card)
    }

    fn require_owner(&mut self, msg: &Incoming) -> bool {
        if self.permissions.is_owner(&msg.author, &msg.roles) {
            return true;
        }
        self.gateway
            .send_error(&msg.channel, "You lack permission to use this command.");
        false
    }

    fn require_listener(&mut self, msg: &Incoming) -> bool {
        if self.listeners.contains(&msg.author) {
            return true;
        }
        let text = format!("Join with {}join to use this command", self.cfg.command_prefix);
        self.gateway.send_error(&msg.channel, &text);
        false
    }
}

fn looks_like_volume(command: &str) -> bool {
    let mut chars = command.chars();
    match chars.next() {
        Some(c) if c.is_ascii_digit() => true,
        Some('+') | Some('-') => chars.next().map(|c| c.is_ascii_digit()).unwrap_or(false),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_volume, ChatGateway, Flow, Incoming, Session, VolumeInput};
    use async_trait::async_trait;
    use jukebox_core::{AppConfig, ChannelId, ParticipantId};
    use jukebox_engine::{
        BatchLimits, FetchDispatcher, FetchOutcome, FetchPipeline, FetchRequest, Player,
        PlayerEvent, PlayerService, Resolution, ResolutionError,
    };
    use jukebox_providers::{
        MediaMetadata, MetadataResolver, MetadataStream, NullSink, PlaybackSink, ResolveError,
        SearchProvider,
    };
    use std::sync::Arc;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct RecordingGateway {
        messages: Vec<String>,
        errors: Vec<String>,
        presence: Vec<Option<String>>,
    }

    impl ChatGateway for RecordingGateway {
        fn send_message(&mut self, _channel: &ChannelId, text: &str) {
            self.messages.push(text.to_string());
        }

        fn send_error(&mut self, _channel: &ChannelId, text: &str) {
            self.errors.push(text.to_string());
        }

        fn set_listening_to(&mut self, title: Option<&str>) {
            self.presence.push(title.map(str::to_string));
        }
    }

    struct StaticResolver;

    #[async_trait]
    impl MetadataResolver for StaticResolver {
        fn name(&self) -> &'static str {
            "static"
        }

        async fn resolve_one(&self, locator: &str) -> Result<MediaMetadata, ResolveError> {
            Ok(MediaMetadata {
                stream_locator: locator.to_string(),
                title: locator.to_string(),
                length_seconds: 120,
                artwork_url: None,
                canonical_url: None,
            })
        }

        async fn resolve_playlist(&self, _locator: &str) -> Result<MetadataStream, ResolveError> {
            Err(ResolveError::Upstream("no playlists here".to_string()))
        }
    }

    #[async_trait]
    impl SearchProvider for StaticResolver {
        async fn search(&self, _term: &str) -> Result<Vec<String>, ResolveError> {
            Ok(Vec::new())
        }
    }

    struct Harness {
        session: Session<RecordingGateway>,
        events: mpsc::UnboundedReceiver<PlayerEvent>,
        outcomes: mpsc::Receiver<FetchOutcome>,
    }

    fn harness(cfg: AppConfig) -> Harness {
        let (tx, events) = mpsc::unbounded_channel();
        let player = Player::new(0.5).unwrap().with_listener(Box::new(move |e| {
            let _ = tx.send(e);
        }));
        let handle = PlayerService::spawn(player);
        let resolver = Arc::new(StaticResolver);
        let pipeline = FetchPipeline::new(resolver.clone(), resolver, 200);
        let (dispatcher, outcomes) = FetchDispatcher::new(pipeline, BatchLimits::default(), 2);
        let session = Session::new(
            cfg,
            RecordingGateway::default(),
            handle,
            dispatcher,
            Box::new(|| Box::new(NullSink::default()) as Box<dyn PlaybackSink>),
        );
        Harness {
            session,
            events,
            outcomes,
        }
    }

    fn msg(author: &str, content: &str) -> Incoming {
        Incoming {
            author: ParticipantId::new(author),
            roles: Vec::new(),
            channel: ChannelId::new("general"),
            content: content.to_string(),
        }
    }

    impl Harness {
        async fn say(&mut self, author: &str, content: &str) -> Flow {
            let flow = self.session.handle_message(msg(author, content)).await.unwrap();
            self.drain_events();
            flow
        }

        fn drain_events(&mut self) {
            while let Ok(event) = self.events.try_recv() {
                self.session.handle_player_event(event);
            }
        }

        async fn play(&mut self, author: &str, query: &str) {
            self.say(author, &format!("!play {query}")).await;
            let outcome = self.outcomes.recv().await.unwrap();
            self.session.handle_fetch(outcome).await.unwrap();
            self.drain_events();
        }

        fn last_message(&self) -> &str {
            self.session.gateway().messages.last().map(String::as_str).unwrap_or("")
        }

        fn last_error(&self) -> &str {
            self.session.gateway().errors.last().map(String::as_str).unwrap_or("")
        }
    }

    #[test]
    fn volume_parsing_handles_relative_forms() {
        assert_eq!(parse_volume("50", 0.2), Ok(0.5));
        assert!((parse_volume("+10", 0.2).unwrap() - 0.3).abs() < 1e-6);
        assert!((parse_volume("-10", 0.25).unwrap() - 0.15).abs() < 1e-6);
        assert_eq!(parse_volume("abc", 0.2), Err(VolumeInput::NotANumber));
        assert!(matches!(parse_volume("150", 0.2), Err(VolumeInput::OutOfRange(_))));
        assert!(matches!(parse_volume("-30", 0.2), Err(VolumeInput::OutOfRange(_))));
    }

    #[tokio::test]
    async fn play_requires_summon_and_membership() {
        let mut h = harness(AppConfig::default());
        h.say("alice", "!play https://youtu.be/a").await;
        assert_eq!(h.last_error(), "You must summon me first!");

        h.say("alice", "!join").await;
        h.say("bob", "!play https://youtu.be/a").await;
        assert_eq!(h.last_error(), "Join with !join to use this command");
    }

    #[tokio::test]
    async fn played_item_starts_and_second_gets_eta() {
        let mut h = harness(AppConfig::default());
        h.say("alice", "!join").await;

        h.play("alice", "https://youtu.be/a").await;
        assert_eq!(h.last_message(), "**https://youtu.be/a** is now playing!");

        h.play("alice", "https://youtu.be/b").await;
        assert_eq!(h.last_message(), "Enqueued **https://youtu.be/b**, ETA: 02:00");
    }

    #[tokio::test]
    async fn skip_vote_needs_quorum_then_resets() {
        let mut cfg = AppConfig::default();
        cfg.votes.self_insta_skip = false;
        cfg.votes.skip.min_count = 2;
        cfg.votes.skip.min_percent = 1.0;
        let mut h = harness(cfg);
        for user in ["alice", "bob", "carol"] {
            h.say(user, "!join").await;
        }
        h.play("alice", "https://youtu.be/a").await;
        h.play("alice", "https://youtu.be/b").await;

        h.say("bob", "!skip").await;
        assert_eq!(h.last_message(), "@bob, vote registered. 1 more votes needed to skip.");
        h.say("bob", "!skip").await;
        assert_eq!(h.last_message(), "@bob, vote registered. 1 more votes needed to skip.");

        h.say("carol", "!skip").await;
        assert_eq!(h.last_message(), "**https://youtu.be/b** is now playing!");
        assert!(h
            .session
            .gateway()
            .messages
            .iter()
            .any(|m| m == "Vote passed. Skipping..."));

        h.say("bob", "!skip").await;
        assert_eq!(h.last_message(), "@bob, vote registered. 1 more votes needed to skip.");
    }

    #[tokio::test]
    async fn skip_votes_for_a_finished_item_do_not_count() {
        let mut cfg = AppConfig::default();
        cfg.votes.self_insta_skip = false;
        cfg.votes.skip.min_count = 2;
        cfg.votes.skip.min_percent = 1.0;
        let mut h = harness(cfg);
        for user in ["alice", "bob", "carol"] {
            h.say(user, "!join").await;
        }
        for name in ["a", "b", "c"] {
            h.play("alice", &format!("https://youtu.be/{name}")).await;
        }

        h.say("bob", "!skip").await;
        assert_eq!(h.last_message(), "@bob, vote registered. 1 more votes needed to skip.");

        // The player moves on by itself; its change event is still undelivered.
        h.session.player.advance().await.unwrap();
        let outcome = h.session.handle_message(msg("carol", "!skip")).await.unwrap();
        assert_eq!(outcome, Flow::Continue);
        assert_eq!(h.last_message(), "@carol, vote registered. 1 more votes needed to skip.");

        h.drain_events();
        let current = h.session.player.current().await.unwrap();
        assert_eq!(current.map(|i| i.display_title).as_deref(), Some("https://youtu.be/b"));
    }

    #[tokio::test]
    async fn failed_stream_is_reported_to_the_requesting_channel() {
        let mut h = harness(AppConfig::default());
        let item = jukebox_core::QueueEntity::new("s", "Broken Song")
            .requested_by(ParticipantId::new("alice"), ChannelId::new("general"));

        h.session.handle_player_event(PlayerEvent::StreamFailed {
            item,
            reason: "player exited with exit status: 1".to_string(),
        });

        assert_eq!(
            h.last_error(),
            "Playback of **Broken Song** stopped: player exited with exit status: 1"
        );
    }

    #[tokio::test]
    async fn requester_skips_own_item_instantly() {
        let mut h = harness(AppConfig::default());
        h.say("alice", "!join").await;
        h.play("alice", "https://youtu.be/a").await;

        h.say("alice", "!skip").await;

        let messages = &h.session.gateway().messages;
        assert!(messages.iter().any(|m| m == "Skipping..."));
        assert_eq!(
            h.session.gateway().presence.last(),
            Some(&Some("!play".to_string()))
        );
    }

    #[tokio::test]
    async fn force_commands_need_owner() {
        let mut cfg = AppConfig::default();
        cfg.permissions.owner_id = "boss".to_string();
        let mut h = harness(cfg);
        h.say("boss", "!join").await;
        h.play("boss", "https://youtu.be/a").await;
        h.play("boss", "https://youtu.be/b").await;
        h.play("boss", "https://youtu.be/c").await;

        h.say("mallory", "!forceclear").await;
        assert_eq!(h.last_error(), "You lack permission to use this command.");

        h.say("boss", "!forceclear").await;
        assert_eq!(h.last_message(), "Cleared 2 songs.");

        assert_eq!(h.say("boss", "!shutdown").await, Flow::Shutdown);
    }

    #[tokio::test]
    async fn volume_commands_report_changes() {
        let mut h = harness(AppConfig::default());
        h.say("alice", "!volume").await;
        assert_eq!(h.last_message(), "Current volume is 50.0");

        h.say("alice", "!+10").await;
        assert_eq!(h.last_message(), "Changed volume from 50.0 to 60.0");

        h.say("alice", "!volume 250").await;
        assert_eq!(h.last_error(), "Volume 250.0 out of range: 1-100");
    }

    #[tokio::test]
    async fn queue_and_now_playing_render() {
        let mut h = harness(AppConfig::default());
        h.say("alice", "!queue").await;
        assert!(h.last_message().starts_with("No songs in the queue!"));
        h.say("alice", "!np").await;
        assert!(h.last_message().starts_with("Nothing currently playing!"));

        h.say("alice", "!join").await;
        h.play("alice", "https://youtu.be/a").await;
        h.play("alice", "https://youtu.be/b").await;

        h.say("alice", "!queue").await;
        assert!(h.last_message().contains("1. **https://youtu.be/b** by alice"));
        h.say("alice", "!song").await;
        assert!(h.last_message().starts_with("https://youtu.be/a\nby alice\n"));
    }

    #[tokio::test]
    async fn fetch_failures_are_reported() {
        let mut h = harness(AppConfig::default());
        let request = FetchRequest {
            requester: ParticipantId::new("alice"),
            channel: ChannelId::new("general"),
            query: "obscure".to_string(),
        };
        h.session
            .handle_fetch(FetchOutcome {
                request: request.clone(),
                result: Err(ResolutionError::NoResults("obscure".to_string())),
            })
            .await
            .unwrap();
        assert_eq!(h.last_error(), "No results for search term: `obscure`");

        let long = jukebox_core::QueueEntity::new("s", "Epic").with_length(10_000);
        h.session
            .handle_fetch(FetchOutcome {
                request,
                result: Ok(Resolution::Single(long)),
            })
            .await
            .unwrap();
        assert_eq!(h.last_error(), "Song too long! (02:46:40, limit is 15:00)");
    }

    #[tokio::test]
    async fn last_listener_leaving_disconnects() {
        let mut h = harness(AppConfig::default());
        h.say("alice", "!join").await;
        h.play("alice", "https://youtu.be/a").await;

        h.say("alice", "!leave").await;
        h.say("alice", "!skip").await;
        assert_eq!(h.last_error(), "Nothing is currently playing!");
        assert_eq!(h.session.listener_count(), 0);
    }

    #[tokio::test]
    async fn messages_without_prefix_are_ignored() {
        let mut h = harness(AppConfig::default());
        assert_eq!(h.say("alice", "hello there").await, Flow::Continue);
        assert!(h.session.gateway().messages.is_empty());
        assert!(h.session.gateway().errors.is_empty());
    }
}
