//! Host objects as seen from scripts.

use std::sync::Arc;

use hostpy::{
    ContextId, ContextKind, EvalOptions, HostObject, ObjectNode, PropertyDescriptor, PropertyKind, PropertyValue,
    Runtime, RuntimeConfig, StaticCalculatorCatalog,
};
use pretty_assertions::assert_eq;

fn solver() -> Arc<ObjectNode> {
    ObjectNode::builder("Solver", "solver")
        .property(PropertyDescriptor::new("max iter", PropertyKind::Int), PropertyValue::Int(5))
        .property(PropertyDescriptor::new("tolerance", PropertyKind::Double), PropertyValue::Double(1e-3))
        .property(PropertyDescriptor::new("label", PropertyKind::String), PropertyValue::String("main".to_owned()))
        .property(
            PropertyDescriptor::new("material", PropertyKind::Link {
                allowed_classes: vec!["Material".to_owned(), "Fluid".to_owned()],
            }),
            PropertyValue::Link(None),
        )
        .helper("Parameter", vec![(
            PropertyDescriptor::new("value", PropertyKind::Double),
            PropertyValue::Double(0.0),
        )])
        .build()
}

struct Fixture {
    runtime: Runtime,
    context: ContextId,
    root: Arc<ObjectNode>,
}

impl Fixture {
    fn new() -> Self {
        let runtime = Runtime::new(RuntimeConfig::default()).unwrap();
        let context = runtime.create_context(ContextKind::ScriptEditor, false).unwrap();
        let root = solver();
        let handle: Arc<dyn HostObject> = root.clone();
        runtime.add_host_object(context, "obj", &handle, true).unwrap();
        Self { runtime, context, root }
    }

    fn run(&self, source: &str) {
        if let Err(err) = self.runtime.evaluate(self.context, source, EvalOptions::quiet()) {
            panic!("script failed: {err}\n{source}");
        }
    }
}

#[test]
fn properties_read_under_normalized_ids() {
    let fixture = Fixture::new();
    fixture.run(
        "\
assert obj.maxiter == 5
assert obj.tolerance == 0.001
assert obj.label == 'main'
assert obj.material is None
assert obj.property_value('max iter') == 5
assert obj.find_property('max iter')['type'] == 'int'
assert obj.find_property('missing') is None
",
    );
}

#[test]
fn setters_and_assignment_validate_types() {
    let fixture = Fixture::new();
    fixture.run(
        "\
obj.setMaxiter(7)
assert obj.maxiter == 7
obj.tolerance = 2
assert obj.tolerance == 2.0
obj.set_property_value('label', 'side')
try:
    obj.maxiter = 'many'
except TypeError as e:
    assert 'max iter' in str(e)
else:
    raise AssertionError('string accepted for an int property')
try:
    obj.setMaxiter(True)
except TypeError:
    pass
else:
    raise AssertionError('bool accepted for an int property')
",
    );
    assert_eq!(fixture.root.property("max iter"), Some(PropertyValue::Int(7)));
    assert_eq!(fixture.root.property("label"), Some(PropertyValue::String("side".to_owned())));
}

#[test]
fn links_respect_the_allow_list() {
    let fixture = Fixture::new();
    let steel: Arc<dyn HostObject> = ObjectNode::new("Material", "steel");
    let sensor: Arc<dyn HostObject> = ObjectNode::new("Sensor", "probe");
    fixture.runtime.add_host_object(fixture.context, "steel", &steel, true).unwrap();
    fixture.runtime.add_host_object(fixture.context, "sensor", &sensor, true).unwrap();

    fixture.run(
        "\
obj.material = steel
assert obj.material == steel.uuid()
try:
    obj.material = sensor
except ValueError as e:
    assert 'Allowed class types: Material, Fluid' in str(e), str(e)
else:
    raise AssertionError('sensor accepted as material')
assert obj.material == steel.uuid()
obj.material = None
assert obj.material is None
",
    );
}

#[test]
fn children_are_attributes_but_cannot_be_overwritten() {
    let fixture = Fixture::new();
    fixture.root.add_child(ObjectNode::new("Mesh", "mesh")).unwrap();

    fixture.run(
        "\
assert obj.mesh.class_name() == 'Mesh'
assert obj.mesh.parent() == obj
assert [c.object_name() for c in obj.children()] == ['mesh']
try:
    obj.mesh = 3
except ValueError as e:
    assert 'It is not allowed to overwrite the child element mesh' in str(e), str(e)
else:
    raise AssertionError('child overwritten')
assert obj.mesh.object_name() == 'mesh'
",
    );
}

#[test]
fn missing_attributes_name_the_object() {
    let fixture = Fixture::new();
    fixture.run(
        "\
try:
    obj.no_such_thing
except AttributeError as e:
    assert 'solver (Solver 0x' in str(e), str(e)
    assert \"has no attribute named 'no_such_thing'\" in str(e), str(e)
else:
    raise AssertionError('missing attribute resolved')
",
    );
}

#[test]
fn helpers_create_children() {
    let fixture = Fixture::new();
    fixture.run(
        "\
p = obj.createParameter('p1')
assert p.object_name() == 'p1'
assert p.class_name() == 'Parameter'
assert p.value == 0.0
assert obj.p1 == p
default = obj.createParameter()
assert default.object_name() == 'Parameter'
try:
    obj.createParameter(3)
except TypeError as e:
    assert 'createParameter(objName) accepts only a argument of type string' in str(e), str(e)
else:
    raise AssertionError('non-string name accepted')
try:
    obj.createWidget('w')
except AttributeError:
    pass
else:
    raise AssertionError('unknown helper resolved')
",
    );
    assert_eq!(fixture.root.child_nodes().len(), 2);
}

#[test]
fn dead_objects_raise_runtime_errors() {
    let runtime = Runtime::new(RuntimeConfig::default()).unwrap();
    let context = runtime.create_context(ContextKind::ScriptEditor, false).unwrap();
    let temporary: Arc<dyn HostObject> = ObjectNode::new("Part", "temporary");
    runtime.add_host_object(context, "gone", &temporary, true).unwrap();
    drop(temporary);

    runtime
        .evaluate(
            context,
            "\
assert not gone
assert not gone.is_valid()
try:
    gone.object_name()
except RuntimeError as e:
    assert 'no longer alive' in str(e)
else:
    raise AssertionError('dead object answered')
",
            EvalOptions::quiet(),
        )
        .unwrap();
}

#[test]
fn proxies_stay_hashable_after_the_object_dies() {
    let runtime = Runtime::new(RuntimeConfig::default()).unwrap();
    let context = runtime.create_context(ContextKind::ScriptEditor, false).unwrap();
    let temporary: Arc<dyn HostObject> = ObjectNode::new("Part", "temporary");
    runtime.add_host_object(context, "part", &temporary, true).unwrap();
    runtime
        .evaluate(context, "seen = {part: 'first'}\nkey = hash(part)", EvalOptions::quiet())
        .unwrap();
    drop(temporary);

    runtime
        .evaluate(
            context,
            "\
assert not part.is_valid()
assert hash(part) == key
assert seen[part] == 'first'
assert part in seen
",
            EvalOptions::quiet(),
        )
        .unwrap();
}

#[test]
fn clones_are_owned_by_the_script() {
    let fixture = Fixture::new();
    fixture.root.add_child(ObjectNode::new("Mesh", "mesh")).unwrap();
    fixture.run(
        "\
copy = obj.clone()
assert copy
assert copy.parent() is None
assert copy.object_name() == 'solver'
assert copy != obj
assert copy.mesh.object_name() == 'mesh'
copy.setMaxiter(99)
assert obj.maxiter == 5
",
    );
    // the copy lives as long as the script keeps it
    fixture.run("assert copy.maxiter == 99\ndel copy");
    assert_eq!(fixture.root.child_nodes().len(), 1);
}

#[test]
fn proxies_compare_by_identity() {
    let fixture = Fixture::new();
    let again: Arc<dyn HostObject> = fixture.root.clone();
    fixture.runtime.add_host_object(fixture.context, "same", &again, true).unwrap();
    fixture.run(
        "\
assert obj == same
assert hash(obj) == hash(same)
assert obj is not same
assert len({obj, same}) == 1
assert obj != 'solver'
assert str(obj) == 'solver'
",
    );
}

#[test]
fn dynamic_attributes_are_stored_on_the_host() {
    let fixture = Fixture::new();
    fixture.run("obj.note = 'checked'\nobj.passes = 3\nassert obj.note == 'checked'");
    assert_eq!(fixture.root.attribute("note"), Some(PropertyValue::String("checked".to_owned())));
    assert_eq!(fixture.root.attribute("passes"), Some(PropertyValue::Int(3)));
    fixture.run(
        "\
try:
    obj.bad = [1, 2]
except TypeError:
    pass
else:
    raise AssertionError('list stored on a host object')
",
    );
}

#[test]
fn dir_lists_properties_children_and_helpers() {
    let fixture = Fixture::new();
    fixture.root.add_child(ObjectNode::new("Mesh", "mesh")).unwrap();
    fixture.run(
        "\
names = dir(obj)
for expected in ['maxiter', 'mesh', 'createParameter', 'children', 'find_child']:
    assert expected in names, expected
",
    );
}

#[test]
fn calculator_constructors_attach_to_the_task() {
    let catalog = StaticCalculatorCatalog::new().with("mesh", "MeshCalculator", true);
    let runtime = Runtime::builder(RuntimeConfig::default())
        .calculators(Arc::new(catalog))
        .build()
        .unwrap();
    let run = runtime.create_context(ContextKind::TaskRun, false).unwrap();

    let orphan = runtime
        .evaluate(run, "MeshCalculator('m')", EvalOptions::quiet())
        .unwrap_err();
    assert!(orphan.to_string().contains("can not find a running parent task"), "{orphan}");

    let task = ObjectNode::new("Task", "main");
    let handle: Arc<dyn HostObject> = task.clone();
    runtime.set_task(run, Some(&handle)).unwrap();
    runtime
        .evaluate(
            run,
            "\
calc = MeshCalculator('fine')
assert calc.class_name() == 'MeshCalculator'
assert calc.parent() == __task
default = MeshCalculator()
assert default.object_name() == 'MeshCalculator'
",
            EvalOptions::quiet(),
        )
        .unwrap();
    let names: Vec<String> = task.child_nodes().iter().map(|c| c.object_name()).collect();
    assert_eq!(names, vec!["fine", "MeshCalculator"]);
}

#[test]
fn calculators_of_earlier_runs_are_deleted_from_the_task() {
    let catalog = StaticCalculatorCatalog::new()
        .with("mesh", "MeshCalculator", true)
        .with("solve", "SolveCalculator", true);
    let runtime = Runtime::builder(RuntimeConfig::default())
        .calculators(Arc::new(catalog))
        .build()
        .unwrap();
    let run = runtime.create_context(ContextKind::TaskRun, false).unwrap();
    assert!(!runtime.delete_calcs_from_task(run));

    let task = ObjectNode::new("Task", "main");
    task.add_child(ObjectNode::new("Note", "readme")).unwrap();
    let handle: Arc<dyn HostObject> = task.clone();
    runtime.set_task(run, Some(&handle)).unwrap();
    runtime
        .evaluate(run, "MeshCalculator('coarse')\nSolveCalculator('steady')", EvalOptions::quiet())
        .unwrap();
    assert_eq!(task.child_nodes().len(), 3);

    assert!(runtime.delete_calcs_from_task(run));
    let names: Vec<String> = task.child_nodes().iter().map(|c| c.object_name()).collect();
    assert_eq!(names, vec!["readme"]);
    runtime
        .evaluate(run, "assert [c.object_name() for c in __task.children()] == ['readme']", EvalOptions::quiet())
        .unwrap();

    let editor = ContextKind::ScriptEditor.fixed_id();
    assert!(!runtime.delete_calcs_from_task(editor));
}
