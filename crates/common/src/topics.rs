use crate::event_bus::Topic;

// Canonical topics published by the host
pub const TOPIC_PLUGIN_STARTED: Topic = Topic("plugin.started");
pub const TOPIC_PLUGIN_STOPPED: Topic = Topic("plugin.stopped");
pub const TOPIC_SECURITY_POLICY: Topic = Topic("resource.securityPolicy");
pub const TOPIC_PERMISSION: Topic = Topic("resource.permission");
