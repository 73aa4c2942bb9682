//! Named, typed properties used for construction parameters and live tunables
//!
//! A [`Property`] holds either an integer or a string. It can also be *live*:
//! get and set are redirected to caller-supplied functions that close over some
//! context (a hardware register, a field of a driver struct, ...). Both the
//! integer and the string accessor work on every property, converting through
//! the underlying representation, so callers never need to know how a value is
//! stored.
//!
//! Properties are shared through [`Arc`]: adding the same property to two lists
//! shares its storage, and it is freed when the last owner drops it.
//!
//! ```rust
//! use dmxbus_core::property::{Property, PropertyList};
//!
//! # fn main() -> dmxbus_core::Result<()> {
//! let mut list = PropertyList::parse("iobase=0x300,irq=9")?;
//! list.add(Property::create_long("slots", 512))?;
//!
//! assert_eq!(list.find("iobase").unwrap().get_long()?, 0x300);
//! assert_eq!(list.find("slots").unwrap().get_string()?, "512");
//! # Ok(())
//! # }
//! ```

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::{error::DmxError, Result};

type LongGetter = Arc<dyn Fn() -> Result<i64> + Send + Sync>;
type LongSetter = Arc<dyn Fn(i64) -> Result<()> + Send + Sync>;
type StringGetter = Arc<dyn Fn() -> Result<String> + Send + Sync>;
type StringSetter = Arc<dyn Fn(&str) -> Result<()> + Send + Sync>;

/// The representation a property was created with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyKind {
    Long,
    String,
}

enum Storage {
    Long(i64),
    String(String),
    LiveLong {
        get: LongGetter,
        set: Option<LongSetter>,
    },
    LiveString {
        get: StringGetter,
        set: Option<StringSetter>,
    },
}

/// A single named value
pub struct Property {
    name: String,
    storage: RwLock<Storage>,
}

/// Read-out of one property for introspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySnapshot {
    pub name: String,
    pub kind: PropertyKind,
    pub live: bool,
    /// `None` when a live getter failed
    pub value: Option<String>,
}

impl Property {
    /// Create a plain integer property
    pub fn create_long(name: impl Into<String>, value: i64) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            storage: RwLock::new(Storage::Long(value)),
        })
    }

    /// Create a plain string property
    pub fn create_string(name: impl Into<String>, value: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            storage: RwLock::new(Storage::String(value.into())),
        })
    }

    /// Property name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Underlying value kind
    pub fn kind(&self) -> PropertyKind {
        match &*self.storage.read() {
            Storage::Long(_) | Storage::LiveLong { .. } => PropertyKind::Long,
            Storage::String(_) | Storage::LiveString { .. } => PropertyKind::String,
        }
    }

    /// True once the property has been bound to live accessors
    pub fn is_live(&self) -> bool {
        matches!(
            &*self.storage.read(),
            Storage::LiveLong { .. } | Storage::LiveString { .. }
        )
    }

    /// Redirect get/set of an integer property through `get`/`set`.
    ///
    /// Both functions receive `context`. Passing `None` for `set` makes the
    /// property read-only. Fails if the property is not a plain integer.
    pub fn bind_live_long<C, G, S>(&self, context: Arc<C>, get: G, set: Option<S>) -> Result<()>
    where
        C: Send + Sync + 'static,
        G: Fn(&C) -> Result<i64> + Send + Sync + 'static,
        S: Fn(&C, i64) -> Result<()> + Send + Sync + 'static,
    {
        let mut storage = self.storage.write();
        if !matches!(&*storage, Storage::Long(_)) {
            return Err(DmxError::PropertyTypeMismatch(format!(
                "{} cannot be bound as a live integer",
                self.name
            )));
        }

        let get_ctx = Arc::clone(&context);
        let get: LongGetter = Arc::new(move || get(&get_ctx));
        let set: Option<LongSetter> = set.map(|set| {
            let set_ctx = Arc::clone(&context);
            Arc::new(move |value| set(&set_ctx, value)) as LongSetter
        });

        *storage = Storage::LiveLong { get, set };
        tracing::trace!("property {} bound to live integer accessors", self.name);
        Ok(())
    }

    /// Redirect get/set of a string property through `get`/`set`.
    ///
    /// Fails if the property is not a plain string.
    pub fn bind_live_string<C, G, S>(&self, context: Arc<C>, get: G, set: Option<S>) -> Result<()>
    where
        C: Send + Sync + 'static,
        G: Fn(&C) -> Result<String> + Send + Sync + 'static,
        S: Fn(&C, &str) -> Result<()> + Send + Sync + 'static,
    {
        let mut storage = self.storage.write();
        if !matches!(&*storage, Storage::String(_)) {
            return Err(DmxError::PropertyTypeMismatch(format!(
                "{} cannot be bound as a live string",
                self.name
            )));
        }

        let get_ctx = Arc::clone(&context);
        let get: StringGetter = Arc::new(move || get(&get_ctx));
        let set: Option<StringSetter> = set.map(|set| {
            let set_ctx = Arc::clone(&context);
            Arc::new(move |value: &str| set(&set_ctx, value)) as StringSetter
        });

        *storage = Storage::LiveString { get, set };
        tracing::trace!("property {} bound to live string accessors", self.name);
        Ok(())
    }

    /// Read the value as an integer
    pub fn get_long(&self) -> Result<i64> {
        // Live accessors run without holding the storage lock so that they may
        // touch other properties (or this one) freely.
        let getter = match &*self.storage.read() {
            Storage::Long(value) => return Ok(*value),
            Storage::String(value) => return self.parse(value),
            Storage::LiveLong { get, .. } => Accessor::Long(Arc::clone(get)),
            Storage::LiveString { get, .. } => Accessor::String(Arc::clone(get)),
        };
        match getter {
            Accessor::Long(get) => get(),
            Accessor::String(get) => self.parse(&get()?),
        }
    }

    /// Write an integer value
    pub fn set_long(&self, value: i64) -> Result<()> {
        let setter = {
            let mut storage = self.storage.write();
            match &mut *storage {
                Storage::Long(current) => {
                    *current = value;
                    return Ok(());
                }
                Storage::String(current) => {
                    *current = value.to_string();
                    return Ok(());
                }
                Storage::LiveLong { set, .. } => set.clone().map(Setter::Long),
                Storage::LiveString { set, .. } => set.clone().map(Setter::String),
            }
        };
        match setter {
            Some(Setter::Long(set)) => set(value),
            Some(Setter::String(set)) => set(&value.to_string()),
            None => Err(DmxError::PropertyReadOnly(self.name.clone())),
        }
    }

    /// Read the value formatted as a string
    pub fn get_string(&self) -> Result<String> {
        let getter = match &*self.storage.read() {
            Storage::Long(value) => return Ok(value.to_string()),
            Storage::String(value) => return Ok(value.clone()),
            Storage::LiveLong { get, .. } => Accessor::Long(Arc::clone(get)),
            Storage::LiveString { get, .. } => Accessor::String(Arc::clone(get)),
        };
        match getter {
            Accessor::Long(get) => get().map(|value| value.to_string()),
            Accessor::String(get) => get(),
        }
    }

    /// Write a value given as a string
    pub fn set_string(&self, value: &str) -> Result<()> {
        let setter = {
            let mut storage = self.storage.write();
            match &mut *storage {
                Storage::Long(current) => {
                    *current = self.parse(value)?;
                    return Ok(());
                }
                Storage::String(current) => {
                    *current = value.to_string();
                    return Ok(());
                }
                Storage::LiveLong { set, .. } => set.clone().map(Setter::Long),
                Storage::LiveString { set, .. } => set.clone().map(Setter::String),
            }
        };
        match setter {
            Some(Setter::Long(set)) => set(self.parse(value)?),
            Some(Setter::String(set)) => set(value),
            None => Err(DmxError::PropertyReadOnly(self.name.clone())),
        }
    }

    /// Duplicate into an independent plain property.
    ///
    /// A live property is captured with its current value.
    pub fn copy(&self) -> Result<Arc<Self>> {
        match self.kind() {
            PropertyKind::Long => Ok(Self::create_long(self.name.clone(), self.get_long()?)),
            PropertyKind::String => Ok(Self::create_string(self.name.clone(), self.get_string()?)),
        }
    }

    /// Current value for introspection
    pub fn snapshot(&self) -> PropertySnapshot {
        PropertySnapshot {
            name: self.name.clone(),
            kind: self.kind(),
            live: self.is_live(),
            value: self.get_string().ok(),
        }
    }

    fn parse(&self, value: &str) -> Result<i64> {
        parse_long(value).ok_or_else(|| DmxError::InvalidPropertyValue {
            name: self.name.clone(),
            value: value.to_string(),
        })
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("live", &self.is_live())
            .finish()
    }
}

enum Accessor {
    Long(LongGetter),
    String(StringGetter),
}

enum Setter {
    Long(LongSetter),
    String(StringSetter),
}

/// Parse an integer the way `strtol(.., 0)` does: optional sign, `0x` hex,
/// leading-zero octal, decimal otherwise.
pub fn parse_long(text: &str) -> Option<i64> {
    let text = text.trim();
    let (negative, digits) = match text.as_bytes().first()? {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };

    let (radix, digits) = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        (16, hex)
    } else if digits.len() > 1 && digits.starts_with('0') {
        (8, &digits[1..])
    } else {
        (10, digits)
    };

    if digits.is_empty() || digits.starts_with(['+', '-']) {
        return None;
    }

    let magnitude = i64::from_str_radix(digits, radix).ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

/// Ordered collection of shared properties
#[derive(Debug, Default)]
pub struct PropertyList {
    entries: Vec<Arc<Property>>,
}

impl PropertyList {
    /// Create an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a list from `name=value` pairs separated by commas.
    ///
    /// Every value becomes a string property; integer access parses it.
    pub fn parse(spec: &str) -> Result<Self> {
        let mut list = Self::new();
        for item in spec.split(',').map(str::trim).filter(|item| !item.is_empty()) {
            let (name, value) = item
                .split_once('=')
                .ok_or_else(|| DmxError::InvalidPropertySyntax(item.to_string()))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(DmxError::InvalidPropertySyntax(item.to_string()));
            }
            list.add(Property::create_string(name, value.trim()))?;
        }
        Ok(list)
    }

    /// Add a property; the list shares ownership with the caller.
    pub fn add(&mut self, property: Arc<Property>) -> Result<()> {
        if self.find(property.name()).is_some() {
            return Err(DmxError::PropertyExists(property.name().to_string()));
        }
        self.entries.push(property);
        Ok(())
    }

    /// Remove a specific property instance, returns false if not present
    pub fn remove(&mut self, property: &Arc<Property>) -> bool {
        match self.entries.iter().position(|p| Arc::ptr_eq(p, property)) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Remove a property by name
    pub fn remove_by_name(&mut self, name: &str) -> Option<Arc<Property>> {
        let index = self.entries.iter().position(|p| p.name() == name)?;
        Some(self.entries.remove(index))
    }

    /// Find a property by name
    pub fn find(&self, name: &str) -> Option<Arc<Property>> {
        self.entries.iter().find(|p| p.name() == name).cloned()
    }

    /// Check whether this exact property instance is in the list
    pub fn exists(&self, property: &Arc<Property>) -> bool {
        self.entries.iter().any(|p| Arc::ptr_eq(p, property))
    }

    /// Number of properties
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// True when the list holds no properties
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Property names in insertion order
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|p| p.name().to_string()).collect()
    }

    /// Iterate in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Property>> {
        self.entries.iter()
    }

    /// Copy the list.
    ///
    /// Live properties are shared with the copy, plain ones are duplicated.
    pub fn copy(&self) -> Result<Self> {
        let entries = self
            .entries
            .iter()
            .map(|p| {
                if p.is_live() {
                    Ok(Arc::clone(p))
                } else {
                    p.copy()
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entries })
    }

    /// Read out every property
    pub fn snapshot(&self) -> Vec<PropertySnapshot> {
        self.entries.iter().map(|p| p.snapshot()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    #[test]
    fn test_parse_long_radix() {
        assert_eq!(parse_long("42"), Some(42));
        assert_eq!(parse_long("0x300"), Some(0x300));
        assert_eq!(parse_long("0X1f"), Some(0x1f));
        assert_eq!(parse_long("017"), Some(0o17));
        assert_eq!(parse_long("0"), Some(0));
        assert_eq!(parse_long("-12"), Some(-12));
        assert_eq!(parse_long(" 7 "), Some(7));
        assert_eq!(parse_long(""), None);
        assert_eq!(parse_long("abc"), None);
        assert_eq!(parse_long("0x"), None);
        assert_eq!(parse_long("--1"), None);
    }

    #[test]
    fn test_long_property_string_access() {
        let p = Property::create_long("slots", 512);
        assert_eq!(p.get_string().unwrap(), "512");

        p.set_string("0x100").unwrap();
        assert_eq!(p.get_long().unwrap(), 256);

        assert!(matches!(
            p.set_string("lots"),
            Err(DmxError::InvalidPropertyValue { .. })
        ));
        assert_eq!(p.get_long().unwrap(), 256);
    }

    #[test]
    fn test_string_property_long_access() {
        let p = Property::create_string("iobase", "0x300");
        assert_eq!(p.get_long().unwrap(), 0x300);

        p.set_long(17).unwrap();
        assert_eq!(p.get_string().unwrap(), "17");
        assert_eq!(p.kind(), PropertyKind::String);
    }

    #[test]
    fn test_live_long_binding() {
        let register = Arc::new(AtomicI64::new(3));
        let p = Property::create_long("cpumode", 0);

        p.bind_live_long(
            Arc::clone(&register),
            |r: &AtomicI64| Ok(r.load(Ordering::SeqCst)),
            Some(|r: &AtomicI64, v| {
                r.store(v, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap();

        assert!(p.is_live());
        assert_eq!(p.get_long().unwrap(), 3);
        assert_eq!(p.get_string().unwrap(), "3");

        p.set_string("5").unwrap();
        assert_eq!(register.load(Ordering::SeqCst), 5);

        register.store(9, Ordering::SeqCst);
        assert_eq!(p.get_string().unwrap(), "9");
    }

    #[test]
    fn test_live_read_only() {
        let p = Property::create_long("framecount", 0);
        p.bind_live_long(
            Arc::new(()),
            |_: &()| Ok(1234),
            None::<fn(&(), i64) -> Result<()>>,
        )
        .unwrap();

        assert_eq!(p.get_long().unwrap(), 1234);
        assert!(matches!(p.set_long(1), Err(DmxError::PropertyReadOnly(_))));
        assert!(matches!(p.set_string("1"), Err(DmxError::PropertyReadOnly(_))));
    }

    #[test]
    fn test_bind_type_mismatch() {
        let p = Property::create_string("connector", "none");
        let res = p.bind_live_long(
            Arc::new(()),
            |_: &()| Ok(0),
            None::<fn(&(), i64) -> Result<()>>,
        );
        assert!(matches!(res, Err(DmxError::PropertyTypeMismatch(_))));
        assert!(!p.is_live());

        let q = Property::create_long("slots", 512);
        let res = q.bind_live_string(
            Arc::new(()),
            |_: &()| Ok(String::new()),
            None::<fn(&(), &str) -> Result<()>>,
        );
        assert!(matches!(res, Err(DmxError::PropertyTypeMismatch(_))));
    }

    #[test]
    fn test_live_string_through_long_accessor() {
        let value = Arc::new(RwLock::new(String::from("12")));
        let p = Property::create_string("label", "");
        p.bind_live_string(
            Arc::clone(&value),
            |v: &RwLock<String>| Ok(v.read().clone()),
            Some(|v: &RwLock<String>, s: &str| {
                *v.write() = s.to_string();
                Ok(())
            }),
        )
        .unwrap();

        assert_eq!(p.get_long().unwrap(), 12);
        p.set_long(99).unwrap();
        assert_eq!(value.read().as_str(), "99");
    }

    #[test]
    fn test_list_add_find_remove() {
        let mut list = PropertyList::new();
        let slots = Property::create_long("slots", 512);
        list.add(Arc::clone(&slots)).unwrap();
        list.add(Property::create_string("connector", "none")).unwrap();

        assert_eq!(list.size(), 2);
        assert_eq!(list.names(), vec!["slots", "connector"]);
        assert!(list.exists(&slots));
        assert!(list.find("missing").is_none());

        assert!(matches!(
            list.add(Property::create_long("slots", 1)),
            Err(DmxError::PropertyExists(_))
        ));

        assert!(list.remove(&slots));
        assert!(!list.remove(&slots));
        assert_eq!(list.size(), 1);
        assert!(list.remove_by_name("connector").is_some());
        assert!(list.is_empty());
    }

    #[test]
    fn test_shared_ownership() {
        let p = Property::create_long("shared", 1);
        let mut a = PropertyList::new();
        let mut b = PropertyList::new();
        a.add(Arc::clone(&p)).unwrap();
        b.add(Arc::clone(&p)).unwrap();
        assert_eq!(Arc::strong_count(&p), 3);

        a.find("shared").unwrap().set_long(7).unwrap();
        assert_eq!(b.find("shared").unwrap().get_long().unwrap(), 7);

        drop(a);
        assert_eq!(Arc::strong_count(&p), 2);
        drop(b);
        assert_eq!(Arc::strong_count(&p), 1);
    }

    #[test]
    fn test_list_copy_shares_live_only() {
        let live = Property::create_long("live", 0);
        live.bind_live_long(
            Arc::new(()),
            |_: &()| Ok(5),
            None::<fn(&(), i64) -> Result<()>>,
        )
        .unwrap();
        let plain = Property::create_long("plain", 1);

        let mut list = PropertyList::new();
        list.add(Arc::clone(&live)).unwrap();
        list.add(Arc::clone(&plain)).unwrap();

        let copy = list.copy().unwrap();
        assert!(Arc::ptr_eq(&copy.find("live").unwrap(), &live));
        assert!(!Arc::ptr_eq(&copy.find("plain").unwrap(), &plain));

        copy.find("plain").unwrap().set_long(2).unwrap();
        assert_eq!(plain.get_long().unwrap(), 1);
    }

    #[test]
    fn test_parse_list() {
        let list = PropertyList::parse("iobase=0x300, membase=0xA000,loopback=0").unwrap();
        assert_eq!(list.names(), vec!["iobase", "membase", "loopback"]);
        assert_eq!(list.find("membase").unwrap().get_long().unwrap(), 0xA000);

        assert!(PropertyList::parse("").unwrap().is_empty());
        assert!(matches!(
            PropertyList::parse("novalue"),
            Err(DmxError::InvalidPropertySyntax(_))
        ));
        assert!(matches!(
            PropertyList::parse("a=1,a=2"),
            Err(DmxError::PropertyExists(_))
        ));
    }
}
