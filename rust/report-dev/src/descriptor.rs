//! Extracts the declared parameters from a report template descriptor.

use crate::{
    error::{Result, ServiceError},
    params::ReportParameter,
};
use roxmltree::{Document, Node, ParsingOptions};

pub const TEMPLATE_NAMESPACE: &str = "http://jasperreports.sourceforge.net/jasperreports";

/// Class assumed when a parameter element omits `class`.
const DEFAULT_CLASS: &str = "java.lang.String";

/// Parameters filled in by the rendering engine itself.
const IGNORED_PARAMETERS: &[&str] = &["Author"];

/// Returns the template's parameters in document order, minus the ignored ones.
pub fn parse_parameters(source: &str) -> Result<Vec<ReportParameter>> {
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    let document = Document::parse_with_options(source, options)
        .map_err(|err| ServiceError::MalformedTemplate(err.to_string()))?;

    let root = document.root_element();
    if root.tag_name().namespace() != Some(TEMPLATE_NAMESPACE) {
        return Err(ServiceError::MalformedTemplate(format!(
            "root element '{}' is not in namespace {TEMPLATE_NAMESPACE}",
            root.tag_name().name()
        )));
    }

    let mut params = Vec::new();
    for element in children_named(root, "parameter") {
        let name = element.attribute("name").ok_or_else(|| {
            ServiceError::MalformedTemplate(format!(
                "parameter element at byte {} has no name attribute",
                element.range().start
            ))
        })?;

        if IGNORED_PARAMETERS.contains(&name) {
            continue;
        }

        let class = element.attribute("class").unwrap_or(DEFAULT_CLASS);
        let default = children_named(element, "defaultValueExpression")
            .next()
            .map(|expr| normalized_text(expr).replace('"', ""));

        params.push(ReportParameter::new(name, class, default.as_deref())?);
    }

    Ok(params)
}

fn children_named<'a, 'input: 'a>(
    parent: Node<'a, 'input>,
    name: &'static str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    parent.children().filter(move |child| {
        child.is_element()
            && child.tag_name().name() == name
            && child.tag_name().namespace() == Some(TEMPLATE_NAMESPACE)
    })
}

/// Direct text content, trimmed, with whitespace runs collapsed to single spaces.
fn normalized_text(node: Node<'_, '_>) -> String {
    let text: String = node
        .children()
        .filter(|child| child.is_text())
        .filter_map(|child| child.text())
        .collect();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{ParameterValue, ENTITY_IDS_PARAMETER, LIST_CLASS};
    use pretty_assertions::assert_eq;

    fn template(body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<jasperReport xmlns="{TEMPLATE_NAMESPACE}" name="sample">
{body}
</jasperReport>"#
        )
    }

    #[test]
    fn collects_parameters_in_document_order() {
        let source = template(
            r#"<parameter name="Title" class="java.lang.String"/>
<parameter name="EntityIds" class="java.util.List">
  <defaultValueExpression><![CDATA[1, 2 ,3]]></defaultValueExpression>
</parameter>
<parameter name="Tags" class="java.util.List"/>"#,
        );

        let params = parse_parameters(&source).unwrap();
        let names: Vec<&str> = params.iter().map(ReportParameter::name).collect();
        assert_eq!(names, vec!["Title", ENTITY_IDS_PARAMETER, "Tags"]);
        assert_eq!(params[0].value(), &ParameterValue::Null);
        assert_eq!(params[1].value(), &ParameterValue::Ids(vec![1, 2, 3]));
        assert_eq!(params[1].class(), LIST_CLASS);
        assert_eq!(params[2].value(), &ParameterValue::Texts(Vec::new()));
    }

    #[test]
    fn author_is_never_materialized() {
        let source = template(
            r#"<parameter name="Author" class="java.util.List">
  <defaultValueExpression>"nobody"</defaultValueExpression>
</parameter>
<parameter name="Title"/>"#,
        );

        let params = parse_parameters(&source).unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].name(), "Title");
        assert_eq!(params[0].class(), DEFAULT_CLASS);
    }

    #[test]
    fn default_expression_is_normalized_and_unquoted() {
        let source = template(
            r#"<parameter name="Title" class="java.lang.String">
  <defaultValueExpression>
      "Monthly   "report"
      summary"
  </defaultValueExpression>
</parameter>"#,
        );

        let params = parse_parameters(&source).unwrap();
        assert_eq!(
            params[0].value(),
            &ParameterValue::Text("Monthly report summary".into())
        );
    }

    #[test]
    fn nested_parameters_are_not_collected() {
        let source = template(
            r#"<subDataset name="inner">
  <parameter name="Hidden"/>
</subDataset>
<parameter name="Visible"/>"#,
        );

        let params = parse_parameters(&source).unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].name(), "Visible");
    }

    #[test]
    fn rejects_unbalanced_markup() {
        let err = parse_parameters("<jasperReport><parameter name=\"x\">").unwrap_err();
        assert!(matches!(err, ServiceError::MalformedTemplate(_)));
    }

    #[test]
    fn rejects_foreign_namespace() {
        let err = parse_parameters(r#"<report xmlns="urn:other"><parameter name="x"/></report>"#)
            .unwrap_err();
        assert!(matches!(err, ServiceError::MalformedTemplate(_)));
    }

    #[test]
    fn rejects_parameter_without_name() {
        let err = parse_parameters(&template(r#"<parameter class="java.lang.String"/>"#))
            .unwrap_err();
        assert!(matches!(err, ServiceError::MalformedTemplate(_)));
    }

    #[test]
    fn bad_entity_id_default_fails_parse() {
        let source = template(
            r#"<parameter name="EntityIds" class="java.util.List">
  <defaultValueExpression>"1,x"</defaultValueExpression>
</parameter>"#,
        );

        let err = parse_parameters(&source).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidIdentifier { .. }));
    }
}
