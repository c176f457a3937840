//! Job manifest templates and their parameter expansion.

use k8s_openapi::api::batch::v1::Job;
use regex::Regex;
use thiserror::Error;

/// Manifest for the job that migrates the multus interface into the host
/// namespace.
pub const SETUP_JOB_TEMPLATE: &str = r#"apiVersion: batch/v1
kind: Job
metadata:
  name: "multus-hostnet-setup-{{ NodeName }}"
  namespace: "{{ Namespace }}"
  labels:
    app: multus-hostnet-setup
spec:
  backoffLimit: 0
  template:
    metadata:
      labels:
        app: multus-hostnet-setup
    spec:
      nodeName: "{{ NodeName }}"
      restartPolicy: Never
      hostNetwork: true
      hostPID: true
      serviceAccountName: multus-hostnet
      containers:
        - name: setup
          image: "multus-hostnet:latest"
          command: ["multus-hostnet-setup-job"]
          securityContext:
            privileged: true
            capabilities:
              add: ["NET_ADMIN"]
          env:
            - name: HOLDER_IP
              value: "{{ HolderIP }}"
            - name: MULTUS_IFACE
              value: "{{ MultusIface }}"
            - name: CONTROLLER_NAME
              value: "{{ ControllerName }}"
            - name: CONTROLLER_NAMESPACE
              value: "{{ Namespace }}"
          volumeMounts:
            - name: netns
              mountPath: /var/run/netns
              mountPropagation: HostToContainer
      volumes:
        - name: netns
          hostPath:
            path: /var/run/netns
"#;

/// Manifest for the job that deletes the migrated interface again.
pub const TEARDOWN_JOB_TEMPLATE: &str = r#"apiVersion: batch/v1
kind: Job
metadata:
  name: "multus-hostnet-teardown-{{ NodeName }}"
  namespace: "{{ Namespace }}"
  labels:
    app: multus-hostnet-teardown
spec:
  backoffLimit: 0
  template:
    metadata:
      labels:
        app: multus-hostnet-teardown
    spec:
      nodeName: "{{ NodeName }}"
      restartPolicy: Never
      hostNetwork: true
      containers:
        - name: teardown
          image: "multus-hostnet:latest"
          command: ["multus-hostnet-teardown-job"]
          securityContext:
            privileged: true
            capabilities:
              add: ["NET_ADMIN"]
          env:
            - name: MIGRATED_IFACE
              value: "{{ MigratedIface }}"
"#;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Couldn't build the placeholder pattern! Reason: {}", .0)]
    Pattern(regex::Error),
    #[error("'{}' template references the undefined parameter '{}'!", .template, .parameter)]
    UndefinedParameter { template: String, parameter: String },
    #[error("'{}' template didn't render into a valid job manifest! Reason: {}", .template, .source)]
    InvalidManifest {
        template: String,
        source: serde_yaml::Error,
    },
}

/// The flat parameter record job templates are expanded against.
#[derive(Debug, Clone, Default)]
pub struct TemplateParams {
    pub node_name: String,
    pub namespace: String,
    pub holder_ip: String,
    pub multus_iface: String,
    pub controller_name: String,
    pub migrated_iface: String,
}

impl TemplateParams {
    fn lookup(&self, parameter: &str) -> Option<&str> {
        match parameter {
            "NodeName" => Some(&self.node_name),
            "Namespace" => Some(&self.namespace),
            "HolderIP" => Some(&self.holder_ip),
            "MultusIface" => Some(&self.multus_iface),
            "ControllerName" => Some(&self.controller_name),
            "MigratedIface" => Some(&self.migrated_iface),
            _ => None,
        }
    }
}

/// Expands `{{ Parameter }}` placeholders in a template body. Referencing a
/// parameter outside the record is an error.
pub fn render_template(
    name: &str,
    body: &str,
    params: &TemplateParams,
) -> Result<String, TemplateError> {
    let placeholder =
        Regex::new(r"\{\{\s*([A-Za-z0-9]+)\s*\}\}").map_err(TemplateError::Pattern)?;

    let mut rendered = String::with_capacity(body.len());
    let mut last = 0;
    for captures in placeholder.captures_iter(body) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        let parameter = &captures[1];
        let value = params
            .lookup(parameter)
            .ok_or_else(|| TemplateError::UndefinedParameter {
                template: name.to_owned(),
                parameter: parameter.to_owned(),
            })?;

        rendered.push_str(&body[last..whole.start()]);
        rendered.push_str(value);
        last = whole.end();
    }
    rendered.push_str(&body[last..]);

    Ok(rendered)
}

/// Renders a template and deserializes the result into a job manifest.
pub fn template_to_job(
    name: &str,
    body: &str,
    params: &TemplateParams,
) -> Result<Job, TemplateError> {
    let rendered = render_template(name, body, params)?;

    serde_yaml::from_str(&rendered).map_err(|source| TemplateError::InvalidManifest {
        template: name.to_owned(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::{
        template_to_job, TemplateError, TemplateParams, SETUP_JOB_TEMPLATE,
        TEARDOWN_JOB_TEMPLATE,
    };

    fn params() -> TemplateParams {
        TemplateParams {
            node_name: "node-1".to_owned(),
            namespace: "default".to_owned(),
            holder_ip: "10.244.1.18".to_owned(),
            multus_iface: "net1".to_owned(),
            controller_name: "multus-hostnet-7vx2p".to_owned(),
            migrated_iface: "mlink2".to_owned(),
        }
    }

    fn container_env(job: &k8s_openapi::api::batch::v1::Job) -> Vec<(String, String)> {
        job.spec
            .as_ref()
            .unwrap()
            .template
            .spec
            .as_ref()
            .unwrap()
            .containers[0]
            .env
            .as_ref()
            .unwrap()
            .iter()
            .map(|env| (env.name.clone(), env.value.clone().unwrap_or_default()))
            .collect()
    }

    #[test]
    fn setup_template_renders_into_a_job_manifest() {
        let job = template_to_job("setup-job", SETUP_JOB_TEMPLATE, &params()).unwrap();

        assert_eq!(
            job.metadata.name.as_deref(),
            Some("multus-hostnet-setup-node-1")
        );
        assert_eq!(job.metadata.namespace.as_deref(), Some("default"));

        let env = container_env(&job);
        assert!(env.contains(&("HOLDER_IP".to_owned(), "10.244.1.18".to_owned())));
        assert!(env.contains(&("MULTUS_IFACE".to_owned(), "net1".to_owned())));
        assert!(env.contains(&("CONTROLLER_NAME".to_owned(), "multus-hostnet-7vx2p".to_owned())));
        assert!(env.contains(&("CONTROLLER_NAMESPACE".to_owned(), "default".to_owned())));
    }

    #[test]
    fn setup_template_pins_the_job_to_the_node() {
        let job = template_to_job("setup-job", SETUP_JOB_TEMPLATE, &params()).unwrap();

        let pod_spec = job.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod_spec.node_name.as_deref(), Some("node-1"));
        assert_eq!(pod_spec.host_network, Some(true));
    }

    #[test]
    fn teardown_template_carries_the_migrated_interface() {
        let job = template_to_job("teardown-job", TEARDOWN_JOB_TEMPLATE, &params()).unwrap();

        assert_eq!(
            job.metadata.name.as_deref(),
            Some("multus-hostnet-teardown-node-1")
        );
        assert!(container_env(&job).contains(&("MIGRATED_IFACE".to_owned(), "mlink2".to_owned())));
    }

    #[test]
    fn undefined_parameters_are_rejected() {
        let result = template_to_job("broken", "name: {{ Bogus }}", &params());

        assert!(matches!(
            result,
            Err(TemplateError::UndefinedParameter { .. })
        ));
    }

    #[test]
    fn malformed_manifests_are_rejected() {
        let result = template_to_job("broken", "{{ NodeName }}: [unterminated", &params());

        assert!(matches!(result, Err(TemplateError::InvalidManifest { .. })));
    }
}
