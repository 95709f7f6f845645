use std::collections::BTreeMap;
use std::sync::Arc;

use recmap_codec::resolver::batch_get;
use recmap_codec::{GraphCodec, ReferenceResolver, ResolveStats, Session, ValueMapper};
use recmap_model::{
    AccessContext, ClassEntry, ClassModel, EnumDescriptor, MappingConfig, TypeDescriptor, TypeRef,
};
use recmap_store::{GenerationPolicy, RecordExistsAction, RecordStore, WritePolicy};
use recmap_types::{FieldValue, Key, ObjectRef, Record, Value};
use tracing::{debug, info};

use crate::config::MapperConfig;
use crate::error::SdkResult;

/// Maps objects to and from records of one store.
///
/// Reads resolve every eager reference reachable from the requested records
/// before returning. Lazy references come back as placeholders holding only
/// their key.
pub struct ObjectMapper {
    store: Arc<dyn RecordStore>,
    model: Arc<ClassModel>,
    codec: GraphCodec,
    config: MapperConfig,
}

impl ObjectMapper {
    pub fn builder(store: Arc<dyn RecordStore>) -> ObjectMapperBuilder {
        ObjectMapperBuilder::new(store)
    }

    /// Configuration the mapper was built with.
    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    /// Codec used for every read and write.
    pub fn codec(&self) -> &GraphCodec {
        &self.codec
    }

    /// Registered classes and their compiled entries.
    pub fn model(&self) -> &ClassModel {
        &self.model
    }

    // ---- Writes ----

    /// Write every bin of `object`.
    ///
    /// A non-zero generation member makes the write conditional on the
    /// stored generation; on success the member is advanced to match.
    pub fn save(&self, object: &ObjectRef) -> SdkResult<()> {
        let (key, bins) = self.codec.encode_record(object)?;
        self.put(object, &key, &bins, None)
    }

    /// Write only the named members, leaving other bins untouched.
    pub fn save_bins(&self, object: &ObjectRef, members: &[&str]) -> SdkResult<()> {
        let (key, bins) = self.codec.encode_bins(object, members)?;
        self.put(object, &key, &bins, Some(RecordExistsAction::Update))
    }

    fn put(
        &self,
        object: &ObjectRef,
        key: &Key,
        bins: &BTreeMap<String, Value>,
        exists_action: Option<RecordExistsAction>,
    ) -> SdkResult<()> {
        let entry = self.class_entry(&object.class())?;
        let mut policy = self.write_policy(&entry);
        if let Some(action) = exists_action {
            policy.record_exists_action = action;
        }
        let generation = self.generation_of(&entry, object, key);
        if let Some(generation) = generation.filter(|g| *g > 0) {
            policy.generation_policy = GenerationPolicy::ExpectGenEqual;
            policy.generation = generation;
        }

        self.store.put(&policy, key, bins)?;
        debug!(class = %entry.name, key = %key, bins = bins.len(), "saved object");

        if policy.generation_policy == GenerationPolicy::ExpectGenEqual {
            self.set_generation(&entry, object, key, policy.generation + 1);
        }
        Ok(())
    }

    /// Delete the record of `object`. Returns `true` if it existed.
    pub fn delete(&self, object: &ObjectRef) -> SdkResult<bool> {
        let entry = self.class_entry(&object.class())?;
        let key = self.codec.key_for_entry(&entry, &object.snapshot())?;
        Ok(self.store.delete(&self.write_policy(&entry), &key)?)
    }

    pub fn delete_by_key(&self, class: &str, key: impl Into<FieldValue>) -> SdkResult<bool> {
        let (entry, key) = self.key(class, key)?;
        Ok(self.store.delete(&self.write_policy(&entry), &key)?)
    }

    // ---- Reads ----

    /// Read the object of `class` stored under `key`, with its references
    /// resolved. `key` is the value of the class's key member.
    pub fn read(&self, class: &str, key: impl Into<FieldValue>) -> SdkResult<Option<ObjectRef>> {
        let (entry, key) = self.key(class, key)?;
        let Some(record) = self.store.get(&self.config.read_policy, &key)? else {
            return Ok(None);
        };
        let mut session = Session::new();
        let object = self.codec.decode_record(&entry, &key, &record, &mut session)?;
        self.resolve(&mut session)?;
        Ok(Some(object))
    }

    /// Read several objects in one batched call. Results line up with `keys`;
    /// records that do not exist come back as `None`.
    pub fn read_batch<I, K>(&self, class: &str, keys: I) -> SdkResult<Vec<Option<ObjectRef>>>
    where
        I: IntoIterator<Item = K>,
        K: Into<FieldValue>,
    {
        let entry = self.class_entry(class)?;
        let keys = keys
            .into_iter()
            .map(|k| self.codec.key_for_value(&entry, &k.into()))
            .collect::<Result<Vec<_>, _>>()?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let records = batch_get(
            self.store.as_ref(),
            &self.config.resolver.batch_policy,
            &keys,
        )?;
        let mut session = Session::new();
        let mut objects = Vec::with_capacity(keys.len());
        for (key, record) in keys.iter().zip(records) {
            objects.push(match record {
                Some(record) => Some(self.codec.decode_record(&entry, key, &record, &mut session)?),
                None => None,
            });
        }
        self.resolve(&mut session)?;
        Ok(objects)
    }

    /// Whether a record of `class` is stored under `key`.
    pub fn exists(&self, class: &str, key: impl Into<FieldValue>) -> SdkResult<bool> {
        let (_, key) = self.key(class, key)?;
        Ok(self.store.exists(&self.config.read_policy, &key)?)
    }

    /// Visit every object of `class` in its set until `visit` returns
    /// `false`. Returns the number of objects visited.
    pub fn scan<F>(&self, class: &str, mut visit: F) -> SdkResult<usize>
    where
        F: FnMut(ObjectRef) -> bool,
    {
        let entry = self.class_entry(class)?;
        let namespace = entry.require_namespace()?;
        let records = self
            .store
            .scan(&self.config.scan_policy, namespace, entry.set())?;
        let mut visited = 0;
        for (key, record) in records {
            let mut session = Session::new();
            let object = self.codec.decode_record(&entry, &key, &record, &mut session)?;
            self.resolve(&mut session)?;
            visited += 1;
            if !visit(object) {
                break;
            }
        }
        Ok(visited)
    }

    // ---- Codec access ----

    /// Key and bins `save` would write for `object`.
    pub fn encode(&self, object: &ObjectRef) -> SdkResult<(Key, BTreeMap<String, Value>)> {
        Ok(self.codec.encode_record(object)?)
    }

    /// Decode a record fetched elsewhere, resolving its references through
    /// this mapper's store.
    pub fn decode(&self, class: &str, key: &Key, record: &Record) -> SdkResult<ObjectRef> {
        let entry = self.class_entry(class)?;
        let mut session = Session::new();
        let object = self.codec.decode_record(&entry, key, record, &mut session)?;
        self.resolve(&mut session)?;
        Ok(object)
    }

    /// Compiled mapping of `class`.
    pub fn class_entry(&self, class: &str) -> SdkResult<Arc<ClassEntry>> {
        Ok(self.model.entry(class)?)
    }

    pub fn register_mapper(&self, ty: TypeRef, mapper: Arc<dyn ValueMapper>) {
        self.codec.registry().register(ty, mapper);
    }

    pub fn register_subclass(&self, short_name: &str, class: &str) -> SdkResult<()> {
        Ok(self.model.register_subclass(short_name, class)?)
    }

    // ---- Internals ----

    fn key(&self, class: &str, key: impl Into<FieldValue>) -> SdkResult<(Arc<ClassEntry>, Key)> {
        let entry = self.class_entry(class)?;
        let key = self.codec.key_for_value(&entry, &key.into())?;
        Ok((entry, key))
    }

    fn resolve(&self, session: &mut Session) -> SdkResult<ResolveStats> {
        let resolver =
            ReferenceResolver::new(&self.codec, self.store.as_ref(), &self.config.resolver);
        let stats = resolver.drain(session)?;
        if stats.waves > 0 {
            debug!(
                waves = stats.waves,
                fetched = stats.fetched,
                missing = stats.missing,
                "references resolved"
            );
        }
        Ok(stats)
    }

    /// Default write policy with the class's own settings applied.
    fn write_policy(&self, entry: &ClassEntry) -> WritePolicy {
        let mut policy = self.config.write_policy.clone();
        policy.ttl = entry.ttl.or(policy.ttl);
        policy.send_key |= entry.send_key;
        policy.durable_delete |= entry.durable_delete;
        policy
    }

    fn generation_of(&self, entry: &ClassEntry, object: &ObjectRef, key: &Key) -> Option<u32> {
        let mapping = entry.generation.as_ref()?;
        let cx = AccessContext {
            owner_key: key.user_key.as_ref(),
        };
        let value = mapping.accessor.read(&mapping.member, &object.read(), &cx);
        value.as_int().and_then(|g| u32::try_from(g).ok())
    }

    fn set_generation(&self, entry: &ClassEntry, object: &ObjectRef, key: &Key, generation: u32) {
        if let Some(mapping) = &entry.generation {
            let cx = AccessContext {
                owner_key: key.user_key.as_ref(),
            };
            mapping.accessor.write(
                &mapping.member,
                &mut object.write(),
                FieldValue::Int(i64::from(generation)),
                &cx,
            );
        }
    }
}

impl std::fmt::Debug for ObjectMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectMapper")
            .field("codec", &self.codec)
            .field("config", &self.config)
            .finish()
    }
}

/// Collects classes, enums, configuration and custom mappers, then compiles
/// them into an [`ObjectMapper`].
pub struct ObjectMapperBuilder {
    store: Arc<dyn RecordStore>,
    config: MapperConfig,
    descriptors: Vec<TypeDescriptor>,
    enums: Vec<EnumDescriptor>,
    subclasses: Vec<(String, String)>,
    mappers: Vec<(TypeRef, Arc<dyn ValueMapper>)>,
}

impl ObjectMapperBuilder {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            config: MapperConfig::default(),
            descriptors: Vec::new(),
            enums: Vec::new(),
            subclasses: Vec::new(),
            mappers: Vec::new(),
        }
    }

    pub fn class(mut self, descriptor: TypeDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    pub fn enumeration(mut self, descriptor: EnumDescriptor) -> Self {
        self.enums.push(descriptor);
        self
    }

    /// Replace the whole configuration. Mapping overrides already added are
    /// kept and merged under the new ones.
    pub fn config(mut self, config: MapperConfig) -> Self {
        let mut mapping = std::mem::take(&mut self.config.mapping);
        mapping.merge(config.mapping.clone());
        self.config = MapperConfig { mapping, ..config };
        self
    }

    pub fn mapping(mut self, mapping: MappingConfig) -> Self {
        self.config.mapping.merge(mapping);
        self
    }

    pub fn write_policy(mut self, policy: WritePolicy) -> Self {
        self.config.write_policy = policy;
        self
    }

    pub fn resolver(mut self, resolver: recmap_codec::ResolverConfig) -> Self {
        self.config.resolver = resolver;
        self
    }

    pub fn subclass(mut self, short_name: impl Into<String>, class: impl Into<String>) -> Self {
        self.subclasses.push((short_name.into(), class.into()));
        self
    }

    pub fn mapper(mut self, ty: TypeRef, mapper: Arc<dyn ValueMapper>) -> Self {
        self.mappers.push((ty, mapper));
        self
    }

    /// Register everything and check the configuration against it.
    ///
    /// Classes are compiled lazily, so mapping errors inside a class surface
    /// on its first use rather than here.
    pub fn build(self) -> SdkResult<ObjectMapper> {
        let model = Arc::new(ClassModel::new());
        for descriptor in self.descriptors {
            model.register(descriptor)?;
        }
        for descriptor in self.enums {
            model.register_enum(descriptor)?;
        }
        if !self.config.mapping.classes.is_empty() {
            model.apply_config(self.config.mapping.clone())?;
        }
        for (short_name, class) in &self.subclasses {
            model.register_subclass(short_name, class)?;
        }

        let codec = GraphCodec::new(Arc::clone(&model));
        for (ty, mapper) in self.mappers {
            codec.registry().register(ty, mapper);
        }

        info!(
            overrides = self.config.mapping.classes.len(),
            batch_threshold = self.config.resolver.batch_threshold,
            "object mapper ready"
        );
        Ok(ObjectMapper {
            store: self.store,
            model,
            codec,
            config: self.config,
        })
    }
}

#[cfg(test)]
mod tests {
    use recmap_codec::{CodecError, CodecResult, DecodeCx, EncodeCx};
    use recmap_model::{
        EmbedSpec, FloatKind, IntKind, MemberDescriptor, ModelError, ReferenceSpec,
    };
    use recmap_store::{InMemoryRecordStore, ReadPolicy, StoreError};
    use recmap_types::Object;

    use super::*;
    use crate::error::SdkError;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    fn str_() -> TypeRef {
        TypeRef::Str
    }

    fn int() -> TypeRef {
        TypeRef::Int(IntKind::I64)
    }

    fn address() -> TypeDescriptor {
        TypeDescriptor::new("Address")
            .member(MemberDescriptor::new("street", str_()))
            .member(MemberDescriptor::new("city", str_()))
    }

    fn customer(embed: EmbedSpec) -> TypeDescriptor {
        TypeDescriptor::new("Customer")
            .namespace("test")
            .set("customers")
            .member(MemberDescriptor::new("id", str_()).key())
            .member(MemberDescriptor::new("name", str_()))
            .member(MemberDescriptor::new("age", TypeRef::Int(IntKind::I32)))
            .member(MemberDescriptor::new("home", TypeRef::object("Address")).embed(embed))
    }

    fn account() -> TypeDescriptor {
        TypeDescriptor::new("Account")
            .namespace("test")
            .set("accounts")
            .member(MemberDescriptor::new("id", str_()).key())
            .member(MemberDescriptor::new("balance", int()))
            .member(MemberDescriptor::new("owner", TypeRef::object("Customer")))
            .member(
                MemberDescriptor::new("sponsor", TypeRef::object("Customer"))
                    .reference(ReferenceSpec::id().lazy()),
            )
    }

    fn sample_customer(id: &str) -> ObjectRef {
        let home = Object::new("Address")
            .with("street", "12 Analytical Row")
            .with("city", "London")
            .into_ref();
        Object::new("Customer")
            .with("id", id)
            .with("name", "Ada")
            .with("age", 36)
            .with("home", home)
            .into_ref()
    }

    fn mapper_with(store: &Arc<InMemoryRecordStore>, classes: Vec<TypeDescriptor>) -> ObjectMapper {
        init_tracing();
        classes
            .into_iter()
            .fold(ObjectMapper::builder(store.clone()), ObjectMapperBuilder::class)
            .build()
            .unwrap()
    }

    fn bank(store: &Arc<InMemoryRecordStore>) -> ObjectMapper {
        mapper_with(store, vec![address(), customer(EmbedSpec::map()), account()])
    }

    // -----------------------------------------------------------------------
    // Round trips
    // -----------------------------------------------------------------------

    #[test]
    fn map_embedding_round_trip() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mapper = bank(&store);
        let original = sample_customer("c1");
        mapper.save(&original).unwrap();

        let key = Key::new("test", "customers", "c1").unwrap();
        let raw = store.get(&ReadPolicy::default(), &key).unwrap().unwrap();
        assert!(raw.bins["home"].as_map().is_some());

        let read = mapper.read("Customer", "c1").unwrap().unwrap();
        assert_eq!(read, original);
    }

    #[test]
    fn list_embedding_round_trip() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mapper = mapper_with(&store, vec![address(), customer(EmbedSpec::list())]);
        let original = sample_customer("c1");
        mapper.save(&original).unwrap();

        let (_, bins) = mapper.encode(&original).unwrap();
        assert_eq!(
            bins["home"],
            Value::List(vec![Value::from("London"), Value::from("12 Analytical Row")])
        );
        assert_eq!(mapper.read("Customer", "c1").unwrap().unwrap(), original);
    }

    #[test]
    fn eager_and_lazy_references() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mapper = bank(&store);
        let owner = sample_customer("c1");
        let account = Object::new("Account")
            .with("id", "a1")
            .with("balance", 100)
            .with("owner", owner.clone())
            .with("sponsor", owner.clone())
            .into_ref();
        mapper.save(&owner).unwrap();
        mapper.save(&account).unwrap();
        store.reset_counts();

        let read = mapper.read("Account", "a1").unwrap().unwrap();
        let read_owner = read.get("owner").unwrap();
        assert_eq!(read_owner.as_object().unwrap(), &owner);

        let sponsor = read.get("sponsor").unwrap();
        let sponsor = sponsor.as_object().unwrap();
        assert_eq!(sponsor.get("id"), Some(FieldValue::from("c1")));
        assert_eq!(sponsor.read().fields.len(), 1);
        assert!(!sponsor.ptr_eq(read_owner.as_object().unwrap()));

        // The account and its eager owner; the lazy sponsor is not fetched.
        assert_eq!(store.call_counts().gets, 2);
    }

    #[test]
    fn decode_of_an_externally_fetched_record() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mapper = bank(&store);
        let original = sample_customer("c1");
        let (key, bins) = mapper.encode(&original).unwrap();
        let decoded = mapper.decode("Customer", &key, &Record::new(bins)).unwrap();
        assert_eq!(decoded, original);
    }

    // -----------------------------------------------------------------------
    // Schema evolution
    // -----------------------------------------------------------------------

    fn row(version: u32) -> TypeDescriptor {
        let small = || TypeRef::Int(IntKind::I32);
        TypeDescriptor::new("Row")
            .version(version)
            .member(MemberDescriptor::new("a", small()).versions(1, 2))
            .member(MemberDescriptor::new("b", small()))
            .member(MemberDescriptor::new("c", small()).versions(1, 1))
            .member(MemberDescriptor::new("d", small()))
            .member(MemberDescriptor::new("f", small()).since(3))
            .member(MemberDescriptor::new("g", small()).since(3))
    }

    fn sheet() -> TypeDescriptor {
        TypeDescriptor::new("Sheet")
            .namespace("test")
            .member(MemberDescriptor::new("id", int()).key())
            .member(MemberDescriptor::new("row", TypeRef::object("Row")).embed(EmbedSpec::list()))
    }

    #[test]
    fn newer_schema_reads_older_list_form() {
        let store = Arc::new(InMemoryRecordStore::new());
        let writer = mapper_with(&store, vec![row(1), sheet()]);
        let reader = mapper_with(&store, vec![row(3), sheet()]);

        let row = Object::new("Row")
            .with("a", 1)
            .with("b", 2)
            .with("c", 3)
            .with("d", 4)
            .into_ref();
        writer
            .save(&Object::new("Sheet").with("id", 1).with("row", row).into_ref())
            .unwrap();

        let sheet = reader.read("Sheet", 1).unwrap().unwrap();
        let row = sheet.get("row").unwrap();
        let row = row.as_object().unwrap();
        for (member, expected) in [("a", 0), ("b", 2), ("c", 0), ("d", 4), ("f", 0), ("g", 0)] {
            assert_eq!(row.get(member), Some(FieldValue::Int(expected)), "member {member}");
        }
    }

    // -----------------------------------------------------------------------
    // Reference graphs
    // -----------------------------------------------------------------------

    fn node() -> TypeDescriptor {
        TypeDescriptor::new("Node")
            .namespace("test")
            .set("nodes")
            .member(MemberDescriptor::new("id", int()).key())
            .member(MemberDescriptor::new("label", str_()))
            .member(MemberDescriptor::new("next", TypeRef::object("Node")))
            .member(MemberDescriptor::new("children", TypeRef::list(TypeRef::object("Node"))))
    }

    fn new_node(id: i64) -> ObjectRef {
        Object::new("Node")
            .with("id", id)
            .with("label", format!("n{id}"))
            .into_ref()
    }

    #[test]
    fn reference_cycles_terminate() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mapper = mapper_with(&store, vec![node()]);
        let a = new_node(1);
        let b = new_node(2);
        a.set("next", b.clone());
        b.set("next", a.clone());
        mapper.save(&a).unwrap();
        mapper.save(&b).unwrap();
        store.reset_counts();

        let read = mapper.read("Node", 1).unwrap().unwrap();
        let next = read.get("next").unwrap();
        let next = next.as_object().unwrap();
        assert_eq!(next.get("label"), Some(FieldValue::from("n2")));
        let back = next.get("next").unwrap();
        assert!(back.as_object().unwrap().ptr_eq(&read));
        assert_eq!(store.call_counts().gets, 2);
    }

    #[test]
    fn one_batch_call_per_wave() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mapper = mapper_with(&store, vec![node()]);
        let root = new_node(0);
        let mut children = Vec::new();
        for c in 1..=3 {
            let child = new_node(c);
            let grandchildren: Vec<FieldValue> = (0..3)
                .map(|g| FieldValue::Object(new_node(c * 10 + g)))
                .collect();
            for g in &grandchildren {
                mapper.save(g.as_object().unwrap()).unwrap();
            }
            child.set("children", grandchildren);
            mapper.save(&child).unwrap();
            children.push(FieldValue::Object(child));
        }
        root.set("children", children);
        mapper.save(&root).unwrap();
        store.reset_counts();

        let read = mapper.read("Node", 0).unwrap().unwrap();
        let counts = store.call_counts();
        assert_eq!(counts.gets, 1);
        assert_eq!(counts.batch_gets, 2);

        let children = read.get("children").unwrap();
        for child in children.as_list().unwrap() {
            let grandchildren = child.as_object().unwrap().get("children").unwrap();
            let grandchildren = grandchildren.as_list().unwrap();
            assert_eq!(grandchildren.len(), 3);
            for g in grandchildren {
                assert!(g.as_object().unwrap().get("label").is_some());
            }
        }
    }

    fn zoo() -> Vec<TypeDescriptor> {
        vec![
            TypeDescriptor::new("Animal")
                .namespace("test")
                .set("animals")
                .member(MemberDescriptor::new("id", str_()).key())
                .member(MemberDescriptor::new("name", str_())),
            TypeDescriptor::new("Dog")
                .parent("Animal")
                .short_name("D")
                .member(MemberDescriptor::new("breed", str_())),
            TypeDescriptor::new("Zoo")
                .namespace("test")
                .set("zoos")
                .member(MemberDescriptor::new("id", str_()).key())
                .member(MemberDescriptor::new("star", TypeRef::object("Animal"))),
        ]
    }

    #[test]
    fn subclass_survives_a_base_typed_reference() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mapper = mapper_with(&store, zoo());
        let rex = Object::new("Dog")
            .with("id", "rex")
            .with("name", "Rex")
            .with("breed", "lab")
            .into_ref();
        let zoo = Object::new("Zoo").with("id", "z1").with("star", rex.clone()).into_ref();
        mapper.save(&rex).unwrap();
        mapper.save(&zoo).unwrap();

        let (_, bins) = mapper.encode(&zoo).unwrap();
        assert_eq!(
            bins["star"],
            Value::List(vec![Value::from("rex"), Value::from("D")])
        );

        let read = mapper.read("Zoo", "z1").unwrap().unwrap();
        let star = read.get("star").unwrap();
        let star = star.as_object().unwrap();
        assert_eq!(star.class(), "Dog");
        assert_eq!(star.get("breed"), Some(FieldValue::from("lab")));
        assert_eq!(star, &rex);
    }

    #[test]
    fn missing_reference_target_reads_as_null() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mapper = bank(&store);
        let account = Object::new("Account")
            .with("id", "a1")
            .with("balance", 5)
            .with("owner", sample_customer("nobody"))
            .into_ref();
        mapper.save(&account).unwrap();

        let read = mapper.read("Account", "a1").unwrap().unwrap();
        assert_eq!(read.get("owner"), Some(FieldValue::Null));
        assert_eq!(read.get("balance"), Some(FieldValue::Int(5)));
    }

    // -----------------------------------------------------------------------
    // Keyed collections
    // -----------------------------------------------------------------------

    #[test]
    fn keyed_collection_omits_and_restores_keys() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mapper = mapper_with(
            &store,
            vec![
                TypeDescriptor::new("Player")
                    .member(MemberDescriptor::new("name", str_()).key())
                    .member(MemberDescriptor::new("position", str_())),
                TypeDescriptor::new("Team")
                    .namespace("test")
                    .member(MemberDescriptor::new("id", str_()).key())
                    .member(
                        MemberDescriptor::new("roster", TypeRef::list(TypeRef::object("Player")))
                            .embed(EmbedSpec::map()),
                    ),
            ],
        );
        let player = |name: &str, position: &str| {
            FieldValue::Object(
                Object::new("Player")
                    .with("name", name)
                    .with("position", position)
                    .into_ref(),
            )
        };
        let team = Object::new("Team")
            .with("id", "t1")
            .with("roster", vec![player("ann", "gk"), player("bob", "fw")])
            .into_ref();
        mapper.save(&team).unwrap();

        let key = Key::new("test", "Team", "t1").unwrap();
        let raw = store.get(&ReadPolicy::default(), &key).unwrap().unwrap();
        let roster = raw.bins["roster"].as_map().unwrap();
        let ann = roster[&Value::from("ann")].as_map().unwrap();
        assert_eq!(ann.len(), 1);
        assert_eq!(ann[&Value::from("position")], Value::from("gk"));

        let read = mapper.read("Team", "t1").unwrap().unwrap();
        assert_eq!(read, team);
    }

    // -----------------------------------------------------------------------
    // Writes, policies and generations
    // -----------------------------------------------------------------------

    #[test]
    fn partial_save_leaves_other_bins() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mapper = bank(&store);
        let c = sample_customer("c1");
        mapper.save(&c).unwrap();
        c.set("age", 37);
        c.set("name", "Augusta");
        mapper.save_bins(&c, &["age"]).unwrap();

        let read = mapper.read("Customer", "c1").unwrap().unwrap();
        assert_eq!(read.get("age"), Some(FieldValue::Int(37)));
        assert_eq!(read.get("name"), Some(FieldValue::from("Ada")));
    }

    #[test]
    fn class_policies_apply_to_writes() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mapper = mapper_with(
            &store,
            vec![TypeDescriptor::new("Token")
                .namespace("test")
                .ttl(300)
                .send_key(true)
                .member(MemberDescriptor::new("id", str_()).key())],
        );
        mapper
            .save(&Object::new("Token").with("id", "t").into_ref())
            .unwrap();
        let key = Key::new("test", "Token", "t").unwrap();
        let record = store.get(&ReadPolicy::default(), &key).unwrap().unwrap();
        assert_eq!(record.expiration, 300);
        assert_eq!(store.stored_key(&key).unwrap().user_key, Some(Value::from("t")));
    }

    #[test]
    fn stale_generation_is_rejected() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mapper = mapper_with(
            &store,
            vec![TypeDescriptor::new("Doc")
                .namespace("test")
                .member(MemberDescriptor::new("id", int()).key())
                .member(MemberDescriptor::new("body", str_()))
                .member(MemberDescriptor::new("gen", int()).generation())],
        );
        mapper
            .save(&Object::new("Doc").with("id", 1).with("body", "v1").into_ref())
            .unwrap();

        let first = mapper.read("Doc", 1).unwrap().unwrap();
        let second = mapper.read("Doc", 1).unwrap().unwrap();
        assert_eq!(first.get("gen"), Some(FieldValue::Int(1)));

        first.set("body", "v2");
        mapper.save(&first).unwrap();
        assert_eq!(first.get("gen"), Some(FieldValue::Int(2)));

        second.set("body", "conflict");
        let err = mapper.save(&second).unwrap_err();
        assert!(matches!(
            err.store_error(),
            Some(StoreError::GenerationMismatch {
                expected: 1,
                actual: 2,
                ..
            })
        ));

        let current = mapper.read("Doc", 1).unwrap().unwrap();
        assert_eq!(current.get("body"), Some(FieldValue::from("v2")));
    }

    // -----------------------------------------------------------------------
    // Batch reads, scans and deletes
    // -----------------------------------------------------------------------

    #[test]
    fn batch_read_lines_up_with_keys() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mapper = bank(&store);
        mapper.save(&sample_customer("c1")).unwrap();
        mapper.save(&sample_customer("c3")).unwrap();
        store.reset_counts();

        let read = mapper.read_batch("Customer", ["c1", "c2", "c3"]).unwrap();
        assert_eq!(read.len(), 3);
        assert!(read[1].is_none());
        assert_eq!(read[2].as_ref().unwrap().get("id"), Some(FieldValue::from("c3")));
        assert_eq!(store.call_counts().batch_gets, 1);
        assert!(mapper
            .read_batch("Customer", Vec::<&str>::new())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn scan_visits_until_told_to_stop() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mapper = bank(&store);
        for id in ["c1", "c2", "c3"] {
            mapper.save(&sample_customer(id)).unwrap();
        }
        let mut ids = Vec::new();
        let visited = mapper
            .scan("Customer", |c| {
                ids.push(c.get("id").unwrap());
                true
            })
            .unwrap();
        assert_eq!(visited, 3);
        assert_eq!(ids.len(), 3);
        assert_eq!(mapper.scan("Customer", |_| false).unwrap(), 1);
    }

    #[test]
    fn exists_and_delete() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mapper = bank(&store);
        let c = sample_customer("c1");
        mapper.save(&c).unwrap();
        assert!(mapper.exists("Customer", "c1").unwrap());
        assert!(mapper.delete(&c).unwrap());
        assert!(!mapper.exists("Customer", "c1").unwrap());
        assert!(!mapper.delete_by_key("Customer", "c1").unwrap());
        assert!(mapper.read("Customer", "c1").unwrap().is_none());
    }

    // -----------------------------------------------------------------------
    // Configuration and registration
    // -----------------------------------------------------------------------

    #[test]
    fn configuration_overrides_descriptors() {
        let store = Arc::new(InMemoryRecordStore::new());
        let config = MapperConfig::from_toml_str(
            r#"
            [[mapping.classes]]
            class = "Customer"
            set = "people"

            [[mapping.classes.bins]]
            field = "name"
            name = "nm"
            "#,
        )
        .unwrap();
        let mapper = ObjectMapper::builder(store.clone())
            .class(address())
            .class(customer(EmbedSpec::map()))
            .config(config)
            .build()
            .unwrap();

        let original = sample_customer("c1");
        let (key, bins) = mapper.encode(&original).unwrap();
        assert_eq!(key.set_name, "people");
        assert!(bins.contains_key("nm"));
        assert!(!bins.contains_key("name"));

        mapper.save(&original).unwrap();
        assert_eq!(mapper.read("Customer", "c1").unwrap().unwrap(), original);
    }

    #[test]
    fn configuration_for_unknown_member_fails_build() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mapping = MappingConfig::from_toml_str(
            r#"
            [[classes]]
            class = "Customer"

            [[classes.bins]]
            field = "ghost"
            name = "g"
            "#,
        )
        .unwrap();
        let err = ObjectMapper::builder(store)
            .class(address())
            .class(customer(EmbedSpec::map()))
            .mapping(mapping)
            .build()
            .unwrap_err();
        assert!(matches!(err, SdkError::Model(ModelError::UnknownMember { .. })));
    }

    #[test]
    fn invalid_class_fails_on_first_use() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mapper = mapper_with(
            &store,
            vec![
                address(),
                TypeDescriptor::new("Broken")
                    .namespace("test")
                    .member(MemberDescriptor::new("id", str_()).key())
                    .member(
                        MemberDescriptor::new("home", TypeRef::object("Address"))
                            .embed(EmbedSpec::map())
                            .reference(ReferenceSpec::id()),
                    ),
            ],
        );
        assert!(matches!(
            mapper.class_entry("Broken"),
            Err(SdkError::Model(ModelError::ConflictingPolicies { .. }))
        ));
        let err = mapper
            .save(&Object::new("Broken").with("id", "b").into_ref())
            .unwrap_err();
        assert!(matches!(
            err,
            SdkError::Codec(CodecError::Model(ModelError::ConflictingPolicies { .. }))
        ));
    }

    /// Stores money as whole cents.
    #[derive(Debug)]
    struct CentsMapper;

    impl ValueMapper for CentsMapper {
        fn to_store(&self, value: &FieldValue, _: &mut EncodeCx<'_>) -> CodecResult<Value> {
            match value {
                FieldValue::Float(v) => Ok(Value::Int((v * 100.0).round() as i64)),
                other => Err(CodecError::TypeMismatch {
                    expected: "money".into(),
                    found: other.type_name().into(),
                }),
            }
        }

        fn from_store(&self, value: &Value, _: &mut DecodeCx<'_>) -> CodecResult<FieldValue> {
            match value {
                Value::Int(cents) => Ok(FieldValue::Float(*cents as f64 / 100.0)),
                other => Err(CodecError::InvalidStoredValue {
                    expected: "cents".into(),
                    found: other.type_name().into(),
                }),
            }
        }
    }

    #[test]
    fn registered_mappers_handle_named_types() {
        let store = Arc::new(InMemoryRecordStore::new());
        let money = TypeRef::Named("Money".into());
        let mapper = ObjectMapper::builder(store.clone())
            .class(
                TypeDescriptor::new("Invoice")
                    .namespace("test")
                    .member(MemberDescriptor::new("id", int()).key())
                    .member(MemberDescriptor::new("total", money.clone()))
                    .member(MemberDescriptor::new("rate", TypeRef::Float(FloatKind::F64))),
            )
            .mapper(money, Arc::new(CentsMapper))
            .build()
            .unwrap();

        let invoice = Object::new("Invoice")
            .with("id", 7)
            .with("total", 12.34)
            .with("rate", 0.5)
            .into_ref();
        let (_, bins) = mapper.encode(&invoice).unwrap();
        assert_eq!(bins["total"], Value::Int(1234));

        mapper.save(&invoice).unwrap();
        assert_eq!(mapper.read("Invoice", 7).unwrap().unwrap(), invoice);
    }

    /// Upper-cases strings on the way in and lower-cases them on the way out.
    #[derive(Debug)]
    struct ShoutingMapper;

    impl ValueMapper for ShoutingMapper {
        fn to_store(&self, value: &FieldValue, _: &mut EncodeCx<'_>) -> CodecResult<Value> {
            match value {
                FieldValue::Str(s) => Ok(Value::Str(s.to_uppercase())),
                other => Err(CodecError::TypeMismatch {
                    expected: "string".into(),
                    found: other.type_name().into(),
                }),
            }
        }

        fn from_store(&self, value: &Value, _: &mut DecodeCx<'_>) -> CodecResult<FieldValue> {
            match value {
                Value::Str(s) => Ok(FieldValue::Str(s.to_lowercase())),
                other => Err(CodecError::InvalidStoredValue {
                    expected: "string".into(),
                    found: other.type_name().into(),
                }),
            }
        }
    }

    #[test]
    fn registered_mappers_override_native_types() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mapper = ObjectMapper::builder(store.clone())
            .class(
                TypeDescriptor::new("Note")
                    .namespace("test")
                    .member(MemberDescriptor::new("id", int()).key())
                    .member(MemberDescriptor::new("text", str_()))
                    .member(MemberDescriptor::new("tags", TypeRef::list(str_()))),
            )
            .mapper(TypeRef::Str, Arc::new(ShoutingMapper))
            .build()
            .unwrap();

        let note = Object::new("Note")
            .with("id", 1)
            .with("text", "abc")
            .with("tags", vec![FieldValue::from("x"), FieldValue::from("y")])
            .into_ref();
        let (_, bins) = mapper.encode(&note).unwrap();
        assert_eq!(bins["text"], Value::from("ABC"));
        assert_eq!(
            bins["tags"],
            Value::List(vec![Value::from("X"), Value::from("Y")])
        );

        mapper.save(&note).unwrap();
        assert_eq!(mapper.read("Note", 1).unwrap().unwrap(), note);
    }

    #[test]
    fn subclasses_can_be_registered_after_build() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mut classes = zoo();
        classes.push(
            TypeDescriptor::new("Cat")
                .parent("Animal")
                .member(MemberDescriptor::new("indoor", TypeRef::Bool)),
        );
        let mapper = mapper_with(&store, classes);
        mapper.register_subclass("Kitty", "Cat").unwrap();
        assert_eq!(
            mapper.model().subclass_for("Animal", "Kitty").unwrap().name,
            "Cat"
        );
    }

    #[test]
    fn eager_digest_reference_round_trip() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mapper = mapper_with(
            &store,
            vec![
                TypeDescriptor::new("Part")
                    .namespace("test")
                    .set("parts")
                    .member(MemberDescriptor::new("id", str_()).key())
                    .member(MemberDescriptor::new("label", str_())),
                TypeDescriptor::new("Kit")
                    .namespace("test")
                    .set("kits")
                    .member(MemberDescriptor::new("id", str_()).key())
                    .member(
                        MemberDescriptor::new("part", TypeRef::object("Part"))
                            .reference(ReferenceSpec::digest()),
                    ),
            ],
        );
        let part = Object::new("Part").with("id", "p1").with("label", "bolt").into_ref();
        let kit = Object::new("Kit").with("id", "k1").with("part", part.clone()).into_ref();
        mapper.save(&part).unwrap();
        mapper.save(&kit).unwrap();

        let (_, bins) = mapper.encode(&kit).unwrap();
        assert!(matches!(bins["part"], Value::Blob(_)));

        let read = mapper.read("Kit", "k1").unwrap().unwrap();
        let read_part = read.get("part").unwrap();
        let read_part = read_part.as_object().unwrap();
        assert_eq!(read_part.get("id"), Some(FieldValue::from("p1")));
        assert_eq!(read, kit);
    }

    #[test]
    fn null_scalars_read_back_as_null() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mapper = bank(&store);
        let original = sample_customer("c5");
        original.set("age", FieldValue::Null);
        original
            .get("home")
            .and_then(|home| home.as_object().cloned())
            .unwrap()
            .set("city", FieldValue::Null);
        mapper.save(&original).unwrap();

        let read = mapper.read("Customer", "c5").unwrap().unwrap();
        assert_eq!(read.get("age"), Some(FieldValue::Null));
        assert_eq!(read, original);
    }

    // -----------------------------------------------------------------------
    // Store failures
    // -----------------------------------------------------------------------

    #[test]
    fn transport_errors_pass_through() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mapper = bank(&store);
        mapper.save(&sample_customer("c1")).unwrap();
        store.set_unavailable(true);

        let err = mapper.read("Customer", "c1").unwrap_err();
        assert!(matches!(err.store_error(), Some(StoreError::Unavailable(_))));
        let err = mapper.save(&sample_customer("c2")).unwrap_err();
        assert!(matches!(err, SdkError::Store(StoreError::Unavailable(_))));

        store.set_unavailable(false);
        assert!(mapper.read("Customer", "c1").unwrap().is_some());
    }
}
