//! Declarative mapping intent for a class.
//!
//! A [`TypeDescriptor`] is what an annotation scanner or a hand-written
//! registration produces: names, namespaces, version ranges, embed and
//! reference policies, accessors and the factory. The compiler turns it into
//! an immutable [`ClassEntry`](crate::ClassEntry); nothing past the compiler
//! looks at descriptors.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use recmap_types::{FieldValue, Object, Value};

use crate::policy::{EmbedSpec, ReferenceSpec};
use crate::types::TypeRef;

/// Context handed to property accessors.
#[derive(Clone, Copy, Debug, Default)]
pub struct AccessContext<'a> {
    /// User key of the record that owns the object, when known.
    pub owner_key: Option<&'a Value>,
}

pub type Getter = Arc<dyn Fn(&Object, &AccessContext<'_>) -> FieldValue + Send + Sync>;
pub type Setter = Arc<dyn Fn(&mut Object, FieldValue, &AccessContext<'_>) + Send + Sync>;

/// How a member's value is read from and written to an instance.
#[derive(Clone, Default)]
pub enum Accessor {
    /// The member lives directly in [`Object::fields`].
    #[default]
    Field,
    /// Getter/setter pair. Either side may be absent.
    Property {
        getter: Option<Getter>,
        setter: Option<Setter>,
    },
}

impl Accessor {
    pub fn is_readable(&self) -> bool {
        match self {
            Self::Field => true,
            Self::Property { getter, .. } => getter.is_some(),
        }
    }

    pub fn is_writable(&self) -> bool {
        match self {
            Self::Field => true,
            Self::Property { setter, .. } => setter.is_some(),
        }
    }

    /// Read `member` from `object`. Unreadable or unset members read as null.
    pub fn read(&self, member: &str, object: &Object, cx: &AccessContext<'_>) -> FieldValue {
        match self {
            Self::Field => object.fields.get(member).cloned().unwrap_or(FieldValue::Null),
            Self::Property {
                getter: Some(getter),
                ..
            } => getter(object, cx),
            Self::Property { getter: None, .. } => FieldValue::Null,
        }
    }

    /// Write `member` on `object`. Returns `false` if there is no setter.
    pub fn write(
        &self,
        member: &str,
        object: &mut Object,
        value: FieldValue,
        cx: &AccessContext<'_>,
    ) -> bool {
        match self {
            Self::Field => {
                object.fields.insert(member.to_string(), value);
                true
            }
            Self::Property {
                setter: Some(setter),
                ..
            } => {
                setter(object, value, cx);
                true
            }
            Self::Property { setter: None, .. } => false,
        }
    }
}

impl fmt::Debug for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field => write!(f, "Field"),
            Self::Property { getter, setter } => f
                .debug_struct("Property")
                .field("getter", &getter.is_some())
                .field("setter", &setter.is_some())
                .finish(),
        }
    }
}

/// Arguments bound to a designated constructor, by parameter name.
#[derive(Clone, Debug, Default)]
pub struct ConstructorArgs {
    values: BTreeMap<String, FieldValue>,
}

impl ConstructorArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, param: impl Into<String>, value: FieldValue) {
        self.values.insert(param.into(), value);
    }

    pub fn get(&self, param: &str) -> Option<&FieldValue> {
        self.values.get(param)
    }

    /// Remove and return a parameter, or null if it was not bound.
    pub fn take(&mut self, param: &str) -> FieldValue {
        self.values.remove(param).unwrap_or(FieldValue::Null)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

pub type BuildFn = Arc<dyn Fn(&str, ConstructorArgs) -> Result<Object, String> + Send + Sync>;

/// How new instances are created during decode.
#[derive(Clone, Default)]
pub enum Factory {
    /// Start from an empty instance and assign every member through its setter.
    #[default]
    Default,
    /// Call `build` with the named parameters, then assign the remaining
    /// members through their setters.
    Constructor { params: Vec<String>, build: BuildFn },
}

impl Factory {
    /// A constructor that places each parameter into the member of the same name.
    pub fn fields_constructor<I, S>(params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let params: Vec<String> = params.into_iter().map(Into::into).collect();
        let build: BuildFn = Arc::new(|class: &str, mut args: ConstructorArgs| {
            let mut object = Object::new(class);
            let names: Vec<String> = args.values.keys().cloned().collect();
            for name in names {
                let value = args.take(&name);
                object.fields.insert(name, value);
            }
            Ok(object)
        });
        Self::Constructor { params, build }
    }

    /// Parameter names bound by the constructor, empty for [`Factory::Default`].
    pub fn params(&self) -> &[String] {
        match self {
            Self::Default => &[],
            Self::Constructor { params, .. } => params,
        }
    }
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "Default"),
            Self::Constructor { params, .. } => {
                f.debug_struct("Constructor").field("params", params).finish()
            }
        }
    }
}

/// Declared mapping of one member.
#[derive(Clone, Debug)]
pub struct MemberDescriptor {
    pub name: String,
    pub ty: TypeRef,
    /// Bin name; defaults to the member name.
    pub stored_name: Option<String>,
    pub version_min: u32,
    pub version_max: u32,
    /// Explicit position in list form.
    pub ordinal: Option<u32>,
    pub excluded: bool,
    /// Bind to the record's generation counter instead of a bin.
    pub generation: bool,
    pub key: bool,
    pub embed: Option<EmbedSpec>,
    pub reference: Option<ReferenceSpec>,
    pub accessor: Accessor,
}

impl MemberDescriptor {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty,
            stored_name: None,
            version_min: 1,
            version_max: u32::MAX,
            ordinal: None,
            excluded: false,
            generation: false,
            key: false,
            embed: None,
            reference: None,
            accessor: Accessor::Field,
        }
    }

    pub fn stored_as(mut self, bin: impl Into<String>) -> Self {
        self.stored_name = Some(bin.into());
        self
    }

    /// Present in schema versions `min..=max`.
    pub fn versions(mut self, min: u32, max: u32) -> Self {
        self.version_min = min;
        self.version_max = max;
        self
    }

    /// Present from schema version `min` onwards.
    pub fn since(mut self, min: u32) -> Self {
        self.version_min = min;
        self
    }

    pub fn ordinal(mut self, ordinal: u32) -> Self {
        self.ordinal = Some(ordinal);
        self
    }

    pub fn exclude(mut self) -> Self {
        self.excluded = true;
        self
    }

    pub fn generation(mut self) -> Self {
        self.generation = true;
        self
    }

    pub fn key(mut self) -> Self {
        self.key = true;
        self
    }

    pub fn embed(mut self, spec: EmbedSpec) -> Self {
        self.embed = Some(spec);
        self
    }

    pub fn reference(mut self, spec: ReferenceSpec) -> Self {
        self.reference = Some(spec);
        self
    }

    pub fn property(mut self, getter: Option<Getter>, setter: Option<Setter>) -> Self {
        self.accessor = Accessor::Property { getter, setter };
        self
    }

    /// The bin name this member is stored under.
    pub fn bin_name(&self) -> &str {
        self.stored_name.as_deref().unwrap_or(&self.name)
    }
}

/// Declared mapping of one class.
///
/// Class-level settings left as `None` are inherited from the nearest
/// ancestor that sets them.
#[derive(Clone, Debug)]
pub struct TypeDescriptor {
    pub name: String,
    pub parent: Option<String>,
    pub namespace: Option<String>,
    pub set_name: Option<String>,
    pub ttl: Option<u32>,
    pub version: Option<u32>,
    pub send_key: Option<bool>,
    pub durable_delete: Option<bool>,
    /// Stored type discriminator; defaults to the class name.
    pub short_name: Option<String>,
    /// Also store the key member as a regular bin.
    pub key_as_bin: bool,
    pub members: Vec<MemberDescriptor>,
    pub factory: Factory,
}

impl TypeDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            namespace: None,
            set_name: None,
            ttl: None,
            version: None,
            send_key: None,
            durable_delete: None,
            short_name: None,
            key_as_bin: true,
            members: Vec::new(),
            factory: Factory::Default,
        }
    }

    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn set(mut self, set_name: impl Into<String>) -> Self {
        self.set_name = Some(set_name.into());
        self
    }

    pub fn ttl(mut self, ttl: u32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    pub fn send_key(mut self, send_key: bool) -> Self {
        self.send_key = Some(send_key);
        self
    }

    pub fn durable_delete(mut self, durable_delete: bool) -> Self {
        self.durable_delete = Some(durable_delete);
        self
    }

    pub fn short_name(mut self, short_name: impl Into<String>) -> Self {
        self.short_name = Some(short_name.into());
        self
    }

    pub fn key_as_bin(mut self, key_as_bin: bool) -> Self {
        self.key_as_bin = key_as_bin;
        self
    }

    pub fn member(mut self, member: MemberDescriptor) -> Self {
        self.members.push(member);
        self
    }

    pub fn factory(mut self, factory: Factory) -> Self {
        self.factory = factory;
        self
    }

    pub fn member_mut(&mut self, name: &str) -> Option<&mut MemberDescriptor> {
        self.members.iter_mut().find(|m| m.name == name)
    }

    /// Discriminator used when this class is stored polymorphically.
    pub fn discriminator(&self) -> &str {
        self.short_name.as_deref().unwrap_or(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_defaults() {
        let m = MemberDescriptor::new("age", TypeRef::Str);
        assert_eq!(m.bin_name(), "age");
        assert_eq!((m.version_min, m.version_max), (1, u32::MAX));
        assert!(m.accessor.is_readable() && m.accessor.is_writable());
        assert_eq!(m.stored_as("a").bin_name(), "a");
    }

    #[test]
    fn property_accessors() {
        let getter: Getter = Arc::new(|obj: &Object, cx: &AccessContext<'_>| {
            let base = obj.get("base").and_then(FieldValue::as_int).unwrap_or(0);
            let key = cx.owner_key.and_then(Value::as_int).unwrap_or(0);
            FieldValue::Int(base + key)
        });
        let accessor = Accessor::Property {
            getter: Some(getter),
            setter: None,
        };
        let obj = Object::new("A").with("base", 5);
        let key = Value::Int(10);
        let cx = AccessContext {
            owner_key: Some(&key),
        };
        assert_eq!(accessor.read("x", &obj, &cx), FieldValue::Int(15));
        assert!(!accessor.is_writable());
        let mut obj = obj;
        assert!(!accessor.write("x", &mut obj, FieldValue::Int(1), &cx));
    }

    #[test]
    fn field_accessor_reads_null_when_unset() {
        let obj = Object::new("A");
        assert_eq!(
            Accessor::Field.read("missing", &obj, &AccessContext::default()),
            FieldValue::Null
        );
    }

    #[test]
    fn fields_constructor_places_params() {
        let factory = Factory::fields_constructor(["id", "name"]);
        assert_eq!(factory.params(), ["id".to_string(), "name".to_string()]);
        let Factory::Constructor { build, .. } = factory else {
            panic!("expected constructor");
        };
        let mut args = ConstructorArgs::new();
        args.insert("id", FieldValue::Int(1));
        args.insert("name", FieldValue::from("n"));
        let obj = build("Thing", args).unwrap();
        assert_eq!(obj.class, "Thing");
        assert_eq!(obj.get("id"), Some(&FieldValue::Int(1)));
    }

    #[test]
    fn discriminator_defaults_to_name() {
        assert_eq!(TypeDescriptor::new("Cat").discriminator(), "Cat");
        assert_eq!(TypeDescriptor::new("Cat").short_name("C").discriminator(), "C");
    }
}
