//! Typed views of common JDK types and events.
//!
//! Strings in JFR may be null, so string fields are `Option<String>`. Fields
//! that older recordings omit carry `#[serde(default)]`.

pub mod builtin {
    use serde::Deserialize;

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct JdkThread {
        #[serde(default)]
        pub os_name: Option<String>,
        #[serde(default)]
        pub os_thread_id: i64,
        #[serde(default)]
        pub java_name: Option<String>,
        #[serde(default)]
        pub java_thread_id: i64,
        #[serde(default)]
        pub group: Option<ThreadGroup>,
        #[serde(rename = "virtual", default)]
        pub is_virtual: Option<bool>,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ThreadGroup {
        #[serde(default)]
        pub parent: Option<Box<ThreadGroup>>,
        #[serde(default)]
        pub name: Option<String>,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct StackTrace {
        #[serde(default)]
        pub truncated: bool,
        #[serde(default)]
        pub frames: Vec<Option<StackFrame>>,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct StackFrame {
        #[serde(default)]
        pub method: Option<JdkMethod>,
        #[serde(default)]
        pub line_number: i32,
        #[serde(default)]
        pub bytecode_index: i32,
        #[serde(rename = "type", default)]
        pub frame_type: Option<FrameType>,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct FrameType {
        #[serde(default)]
        pub description: Option<String>,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct JdkMethod {
        #[serde(rename = "type", default)]
        pub class: Option<Class>,
        #[serde(default)]
        pub name: Option<Symbol>,
        #[serde(default)]
        pub descriptor: Option<Symbol>,
        #[serde(default)]
        pub modifiers: i32,
        #[serde(default)]
        pub hidden: bool,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Symbol {
        #[serde(default)]
        pub string: Option<String>,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Class {
        #[serde(default)]
        pub class_loader: Option<ClassLoader>,
        #[serde(default)]
        pub name: Option<Symbol>,
        #[serde(default)]
        pub package: Option<Package>,
        #[serde(default)]
        pub modifiers: i32,
        #[serde(default)]
        pub hidden: bool,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Package {
        #[serde(default)]
        pub name: Option<Symbol>,
        #[serde(default)]
        pub module: Option<Module>,
        #[serde(default)]
        pub exported: bool,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Module {
        #[serde(default)]
        pub name: Option<Symbol>,
        #[serde(default)]
        pub version: Option<Symbol>,
        #[serde(default)]
        pub location: Option<Symbol>,
        #[serde(default)]
        pub class_loader: Option<ClassLoader>,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ClassLoader {
        #[serde(rename = "type", default)]
        pub class: Option<Box<Class>>,
        #[serde(default)]
        pub name: Option<Symbol>,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ThreadState {
        #[serde(default)]
        pub name: Option<String>,
    }
}

pub mod jdk {
    use super::builtin::*;
    use serde::Deserialize;

    pub const EXECUTION_SAMPLE: &str = "jdk.ExecutionSample";
    pub const OBJECT_ALLOCATION_IN_NEW_TLAB: &str = "jdk.ObjectAllocationInNewTLAB";
    pub const OBJECT_ALLOCATION_OUTSIDE_TLAB: &str = "jdk.ObjectAllocationOutsideTLAB";
    pub const JAVA_MONITOR_ENTER: &str = "jdk.JavaMonitorEnter";
    pub const THREAD_PARK: &str = "jdk.ThreadPark";
    pub const CPU_LOAD: &str = "jdk.CPULoad";
    pub const THREAD_START: &str = "jdk.ThreadStart";

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ExecutionSample {
        #[serde(default)]
        pub start_time: i64,
        #[serde(default)]
        pub sampled_thread: Option<JdkThread>,
        #[serde(default)]
        pub stack_trace: Option<StackTrace>,
        #[serde(default)]
        pub state: Option<ThreadState>,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ObjectAllocationInNewTLAB {
        #[serde(default)]
        pub start_time: i64,
        #[serde(default)]
        pub event_thread: Option<JdkThread>,
        #[serde(default)]
        pub stack_trace: Option<StackTrace>,
        #[serde(default)]
        pub object_class: Option<Class>,
        #[serde(default)]
        pub allocation_size: i64,
        #[serde(rename = "tlabSize", default)]
        pub tlab_size: i64,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ObjectAllocationOutsideTLAB {
        #[serde(default)]
        pub start_time: i64,
        #[serde(default)]
        pub event_thread: Option<JdkThread>,
        #[serde(default)]
        pub stack_trace: Option<StackTrace>,
        #[serde(default)]
        pub object_class: Option<Class>,
        #[serde(default)]
        pub allocation_size: i64,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct JavaMonitorEnter {
        #[serde(default)]
        pub start_time: i64,
        #[serde(default)]
        pub duration: i64,
        #[serde(default)]
        pub event_thread: Option<JdkThread>,
        #[serde(default)]
        pub stack_trace: Option<StackTrace>,
        #[serde(default)]
        pub monitor_class: Option<Class>,
        #[serde(default)]
        pub previous_owner: Option<JdkThread>,
        #[serde(default)]
        pub address: i64,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ThreadPark {
        #[serde(default)]
        pub start_time: i64,
        #[serde(default)]
        pub duration: i64,
        #[serde(default)]
        pub event_thread: Option<JdkThread>,
        #[serde(default)]
        pub stack_trace: Option<StackTrace>,
        #[serde(default)]
        pub parked_class: Option<Class>,
        #[serde(default)]
        pub timeout: i64,
        #[serde(default)]
        pub until: i64,
        #[serde(default)]
        pub address: i64,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct CPULoad {
        #[serde(default)]
        pub start_time: i64,
        #[serde(rename = "jvmUser", default)]
        pub jvm_user: f32,
        #[serde(rename = "jvmSystem", default)]
        pub jvm_system: f32,
        #[serde(rename = "machineTotal", default)]
        pub machine_total: f32,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ThreadStart {
        #[serde(default)]
        pub start_time: i64,
        #[serde(default)]
        pub event_thread: Option<JdkThread>,
        #[serde(default)]
        pub stack_trace: Option<StackTrace>,
        #[serde(default)]
        pub thread: Option<JdkThread>,
        #[serde(default)]
        pub parent_thread: Option<JdkThread>,
    }
}
