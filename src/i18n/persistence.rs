//! Key/value persistence for the explicit locale choice.
//!
//! Only one slot is used ([`CHOSEN_LOCALE_KEY`]). Stores are single-threaded
//! and use interior mutability so a `LocaleStore` can share one by `Rc`.

use anyhow::{Context, Result};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

/// Storage key (and cookie name) of the explicit locale choice.
pub const CHOSEN_LOCALE_KEY: &str = "chosenLocale";

/// Where the explicit locale choice is persisted.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory store. Clones share the same map, which lets a test "reload"
/// by building a second `LocaleStore` over a clone.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: Rc<RefCell<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values.borrow_mut().remove(key);
        Ok(())
    }
}

/// JSON object on disk, read and rewritten on every access.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", self.path.display()))
    }

    fn write(&self, values: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create directory {}", parent.display())
                })?;
            }
        }
        let content = serde_json::to_string_pretty(values)?;
        fs::write(&self.path, content)
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.read()?;
        values.insert(key.to_string(), value.to_string());
        self.write(&values)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.read()?;
        if values.remove(key).is_some() {
            self.write(&values)?;
        }
        Ok(())
    }
}

/// Cookie-backed store for one HTTP exchange.
///
/// Reads come from the request's `Cookie` header; writes are queued as
/// `Set-Cookie` values for the response.
#[derive(Debug, Clone, Default)]
pub struct CookieStore {
    cookies: Rc<RefCell<HashMap<String, String>>>,
    set_cookies: Rc<RefCell<Vec<String>>>,
}

impl CookieStore {
    /// Store backed by the request's `Cookie` header.
    pub fn from_header(header: Option<&str>) -> Self {
        Self {
            cookies: Rc::new(RefCell::new(
                header.map(parse_cookie_header).unwrap_or_default(),
            )),
            set_cookies: Rc::default(),
        }
    }

    /// `Set-Cookie` values produced so far, in write order.
    pub fn set_cookie_headers(&self) -> Vec<String> {
        self.set_cookies.borrow().clone()
    }
}

impl KeyValueStore for CookieStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.cookies.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.cookies
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        self.set_cookies.borrow_mut().push(set_cookie(key, value));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.cookies.borrow_mut().remove(key);
        self.set_cookies.borrow_mut().push(clear_cookie(key));
        Ok(())
    }
}

/// Parse a `Cookie` request header. Empty values count as absent.
pub fn parse_cookie_header(header: &str) -> HashMap<String, String> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let (name, value) = (name.trim(), value.trim().trim_matches('"'));
            (!name.is_empty() && !value.is_empty()).then(|| (name.to_string(), value.to_string()))
        })
        .collect()
}

pub fn set_cookie(key: &str, value: &str) -> String {
    format!("{}={}; path=/", key, value)
}

pub fn clear_cookie(key: &str) -> String {
    format!("{}=; Max-Age=0; path=/", key)
}
