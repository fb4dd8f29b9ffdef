use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Context};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::*;
use crate::core::helpers::{hash_password, now_iso};
use crate::models::models::{Post, User};

/// In-process JSON key-value store.
///
/// Values are kept as `serde_json::Value`, so a snapshot is just the map
/// serialized to disk. All list mutations go through [`Store::update_json`],
/// which holds the write lock for the whole read-modify-write.
#[derive(Clone, Default)]
pub struct Store {
    inner: Arc<RwLock<HashMap<String, Value>>>,
    path: Option<Arc<PathBuf>>,
}

impl Store {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens a store backed by a snapshot file. A missing file starts empty.
    pub fn open(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            info!("Using memory-only store");
            return Ok(Self::in_memory());
        };

        let data = if path.exists() {
            let raw = fs::read(&path)
                .with_context(|| format!("reading snapshot {}", path.display()))?;
            let map: HashMap<String, Value> = serde_json::from_slice(&raw)
                .with_context(|| format!("parsing snapshot {}", path.display()))?;
            info!("Loaded {} keys from {}", map.len(), path.display());
            map
        } else {
            info!("No snapshot at {}, starting empty", path.display());
            HashMap::new()
        };

        Ok(Self {
            inner: Arc::new(RwLock::new(data)),
            path: Some(Arc::new(path)),
        })
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        let map = self.inner.read().map_err(|_| anyhow!("store lock poisoned"))?;
        match map.get(key) {
            Some(value) => Ok(Some(
                T::deserialize(value).with_context(|| format!("decoding key {key}"))?,
            )),
            None => Ok(None),
        }
    }

    pub fn set_json<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<()> {
        let value = serde_json::to_value(value)?;
        let mut map = self.inner.write().map_err(|_| anyhow!("store lock poisoned"))?;
        map.insert(key.to_string(), value);
        Ok(())
    }

    pub fn delete(&self, key: &str) -> anyhow::Result<()> {
        let mut map = self.inner.write().map_err(|_| anyhow!("store lock poisoned"))?;
        map.remove(key);
        Ok(())
    }

    pub fn exists(&self, key: &str) -> anyhow::Result<bool> {
        let map = self.inner.read().map_err(|_| anyhow!("store lock poisoned"))?;
        Ok(map.contains_key(key))
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Atomically loads `key` (or `T::default()`), applies `f` and writes it back.
    pub fn update_json<T, R, F>(&self, key: &str, f: F) -> anyhow::Result<R>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut T) -> R,
    {
        self.transaction(|tx| tx.update_json(key, f))
    }

    /// Runs `f` against several keys under one write lock.
    ///
    /// If `f` returns an error every key it touched is restored.
    pub fn transaction<R, F>(&self, f: F) -> anyhow::Result<R>
    where
        F: FnOnce(&mut Txn<'_>) -> anyhow::Result<R>,
    {
        let mut map = self.inner.write().map_err(|_| anyhow!("store lock poisoned"))?;
        let mut tx = Txn {
            map: &mut *map,
            undo: Vec::new(),
        };

        match f(&mut tx) {
            Ok(result) => Ok(result),
            Err(e) => {
                tx.rollback();
                Err(e)
            }
        }
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        let mut map = self.inner.write().map_err(|_| anyhow!("store lock poisoned"))?;
        map.clear();
        Ok(())
    }

    /// Writes the snapshot file, if this store has one.
    pub fn flush(&self) -> anyhow::Result<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };

        let bytes = {
            let map = self.inner.read().map_err(|_| anyhow!("store lock poisoned"))?;
            serde_json::to_vec(&*map)?
        };
        write_atomic(path, &bytes)?;
        debug!("Flushed {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }
}

/// Write access to the store while [`Store::transaction`] holds the lock.
pub struct Txn<'a> {
    map: &'a mut HashMap<String, Value>,
    undo: Vec<(String, Option<Value>)>,
}

impl Txn<'_> {
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        match self.map.get(key) {
            Some(value) => Ok(Some(
                T::deserialize(value).with_context(|| format!("decoding key {key}"))?,
            )),
            None => Ok(None),
        }
    }

    pub fn exists(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn set_json<T: Serialize>(&mut self, key: &str, value: &T) -> anyhow::Result<()> {
        let value = serde_json::to_value(value)?;
        self.remember(key);
        self.map.insert(key.to_string(), value);
        Ok(())
    }

    pub fn delete(&mut self, key: &str) {
        self.remember(key);
        self.map.remove(key);
    }

    pub fn update_json<T, R, F>(&mut self, key: &str, f: F) -> anyhow::Result<R>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut T) -> R,
    {
        let mut current: T = self.get_json(key)?.unwrap_or_default();
        let result = f(&mut current);
        self.set_json(key, &current)?;
        Ok(result)
    }

    fn remember(&mut self, key: &str) {
        if !self.undo.iter().any(|(k, _)| k == key) {
            self.undo.push((key.to_string(), self.map.get(key).cloned()));
        }
    }

    fn rollback(&mut self) {
        for (key, previous) in self.undo.drain(..).rev() {
            match previous {
                Some(value) => self.map.insert(key, value),
                None => self.map.remove(&key),
            };
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

// === Demo data ===

fn find_user_id(store: &Store, users: &[String], username: &str) -> anyhow::Result<Option<String>> {
    for id in users {
        if let Some(u) = store.get_json::<User>(&user_key(id))? {
            if u.username == username {
                return Ok(Some(u.id));
            }
        }
    }
    Ok(None)
}

fn seed_user(
    store: &Store,
    username: &str,
    display_name: &str,
    bio: &str,
    posts: &[&str],
) -> anyhow::Result<String> {
    let user_id = Uuid::new_v4().to_string();
    let mut user = User::new(user_id.clone(), username.to_string(), hash_password(username)?);
    user.display_name = Some(display_name.to_string());
    user.bio = Some(bio.to_string());

    store.transaction(|tx| {
        tx.set_json(&user_key(&user_id), &user)?;
        tx.update_json(USERS_LIST_KEY, |users: &mut Vec<String>| users.push(user_id.clone()))?;
        tx.update_json(USERNAMES_KEY, |names: &mut HashMap<String, String>| {
            names.insert(username.to_ascii_lowercase(), user_id.clone())
        })?;
        Ok(())
    })?;

    for desc in posts {
        let post = Post {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.clone(),
            desc: desc.to_string(),
            img: None,
            video: None,
            is_sensitive: false,
            created_at: now_iso(),
            updated_at: None,
        };
        store.set_json(&post_key(&post.id), &post)?;
        store.update_json(TIMELINE_KEY, |timeline: &mut Vec<String>| {
            timeline.insert(0, post.id.clone())
        })?;
    }

    Ok(user_id)
}

/// Creates the `test`, `alice` and `bob` accounts (password = username) unless present.
pub fn seed_demo_data(store: &Store) -> anyhow::Result<()> {
    let users: Vec<String> = store.get_json(USERS_LIST_KEY)?.unwrap_or_default();

    let test_id = match find_user_id(store, &users, "test")? {
        Some(id) => id,
        None => seed_user(
            store,
            "test",
            "Test User",
            "Test user bio",
            &["This is my first post on Chirp!"],
        )?,
    };

    if find_user_id(store, &users, "alice")?.is_none() {
        seed_user(
            store,
            "alice",
            "Alice",
            "Hello, I'm Alice!",
            &[
                "Welcome to my corner! Excited to share thoughts here.",
                "Just finished an amazing project. Feeling productive today!",
            ],
        )?;
    }

    let bob_id = match find_user_id(store, &users, "bob")? {
        Some(id) => id,
        None => seed_user(
            store,
            "bob",
            "Bob",
            "Bob's corner of the internet",
            &["Hey everyone! Just joined, looking forward to connecting with you all."],
        )?,
    };

    store.update_json(&followings_key(&test_id), |f: &mut Vec<String>| {
        if !f.contains(&bob_id) {
            f.push(bob_id.clone());
        }
    })?;
    store.update_json(&followers_key(&bob_id), |f: &mut Vec<String>| {
        if !f.contains(&test_id) {
            f.push(test_id.clone());
        }
    })?;

    info!("Demo data ready ({} keys)", store.len());
    Ok(())
}

pub fn reset_data(store: &Store) -> anyhow::Result<()> {
    store.clear()?;
    info!("Store cleared");
    Ok(())
}
