// SPDX-License-Identifier: GPL-3.0-only

//! Storage for in-flight frame events.
//!
//! Events live in a table keyed by their correlation token and are listed
//! once under their client and once under their drawable. Destroying a
//! client or drawable only marks the attached events; they are freed by
//! whoever retires them, typically the completion handler once the kernel
//! gives the token back.

use super::event::{Binding, FrameEvent};
use crate::{
    drawable::{ClientId, DrawableId},
    transport::EventToken,
};
use indexmap::IndexMap;
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct FrameEventRegistry {
    events: HashMap<EventToken, FrameEvent>,
    by_client: IndexMap<ClientId, Vec<EventToken>>,
    by_drawable: IndexMap<DrawableId, Vec<EventToken>>,
    next_token: u64,
}

impl FrameEventRegistry {
    pub fn new() -> Self {
        Self {
            next_token: 1,
            ..Self::default()
        }
    }

    /// Store an event and hand out its token. The event is not attached
    /// to any tracking list until [`register`](Self::register).
    pub fn insert(&mut self, event: FrameEvent) -> EventToken {
        let token = EventToken(self.next_token.max(1));
        self.next_token = token.0 + 1;
        self.events.insert(token, event);
        token
    }

    /// Attach an event to the lists of its client and drawable.
    ///
    /// Returns `false` if the token is unknown or already attached.
    pub fn register(&mut self, token: EventToken, client: ClientId, drawable: DrawableId) -> bool {
        let Some(event) = self.events.get_mut(&token) else {
            return false;
        };
        if !matches!(event.client, Binding::Unregistered(_))
            || !matches!(event.drawable, Binding::Unregistered(_))
        {
            warn!(?token, "Frame event registered twice");
            return false;
        }
        event.client = Binding::Live(client);
        event.drawable = Binding::Live(drawable);
        self.by_client.entry(client).or_default().push(token);
        self.by_drawable.entry(drawable).or_default().push(token);
        true
    }

    pub fn get(&self, token: EventToken) -> Option<&FrameEvent> {
        self.events.get(&token)
    }

    pub fn get_mut(&mut self, token: EventToken) -> Option<&mut FrameEvent> {
        self.events.get_mut(&token)
    }

    pub fn contains(&self, token: EventToken) -> bool {
        self.events.contains_key(&token)
    }

    /// Detach an event from both lists and hand it back for freeing.
    pub fn remove(&mut self, token: EventToken) -> Option<FrameEvent> {
        let event = self.events.remove(&token)?;
        if let Some(client) = event.client.live() {
            detach(&mut self.by_client, client, token);
        }
        if let Some(drawable) = event.drawable.live() {
            detach(&mut self.by_drawable, drawable, token);
        }
        Some(event)
    }

    /// Mark every event of `client` as having nobody to notify.
    pub fn on_client_destroyed(&mut self, client: ClientId) -> usize {
        let Some(tokens) = self.by_client.shift_remove(&client) else {
            return 0;
        };
        for token in &tokens {
            if let Some(event) = self.events.get_mut(token) {
                event.client = Binding::Gone(client);
            }
        }
        debug!(?client, events = tokens.len(), "Client gone with events outstanding");
        tokens.len()
    }

    /// Mark every event of `drawable` as having no drawable to act on.
    pub fn on_drawable_destroyed(&mut self, drawable: DrawableId) -> usize {
        let Some(tokens) = self.by_drawable.shift_remove(&drawable) else {
            return 0;
        };
        for token in &tokens {
            if let Some(event) = self.events.get_mut(token) {
                event.drawable = Binding::Gone(drawable);
            }
        }
        debug!(?drawable, events = tokens.len(), "Drawable gone with events outstanding");
        tokens.len()
    }

    pub fn events_for_client(&self, client: ClientId) -> &[EventToken] {
        self.by_client.get(&client).map_or(&[], Vec::as_slice)
    }

    pub fn events_for_drawable(&self, drawable: DrawableId) -> &[EventToken] {
        self.by_drawable.get(&drawable).map_or(&[], Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

fn detach<K: std::hash::Hash + Eq>(lists: &mut IndexMap<K, Vec<EventToken>>, key: K, token: EventToken) {
    let Some(list) = lists.get_mut(&key) else {
        return;
    };
    list.retain(|t| *t != token);
    if list.is_empty() {
        lists.shift_remove(&key);
    }
}
