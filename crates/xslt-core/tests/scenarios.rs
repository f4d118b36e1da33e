//! End-to-end transforms exercising the driver, instruction handlers, and serializer
//! together: apply-templates mode dispatch, sorted for-each, attribute value
//! construction via xsl:element/xsl:attribute, recursive call-template with
//! with-param, and format-number.

use xslt_core::fetch::Fetcher;
use xslt_core::{transform, Options, ParamMap, XsltResult};

struct NullFetcher;

impl Fetcher for NullFetcher {
    fn fetch(&self, url: &str) -> XsltResult<String> {
        Err(xslt_core::XsltError::fetch(url, "no includes in this test"))
    }
}

fn run(stylesheet: &str, input: &str) -> String {
    transform(input, stylesheet, &ParamMap::new(), &Options::default(), &NullFetcher).unwrap()
}

#[test]
fn identity_copy_of_selected_children() {
    let stylesheet = r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform" version="1.0">
        <xsl:output omit-xml-declaration="yes"/>
        <xsl:template match="/">
            <xsl:copy-of select="*"/>
        </xsl:template>
    </xsl:stylesheet>"#;
    let input = r#"<a><b x="1"/></a>"#;
    assert_eq!(run(stylesheet, input), r#"<a><b x="1"/></a>"#);
}

#[test]
fn modes_select_disjoint_templates() {
    let stylesheet = r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform" version="1.0">
        <xsl:output omit-xml-declaration="yes"/>
        <xsl:template match="/">
            <xsl:apply-templates select="r/item"/>
            <xsl:apply-templates select="r/item" mode="x"/>
        </xsl:template>
        <xsl:template match="item">id=<xsl:value-of select="@id"/></xsl:template>
        <xsl:template match="item" mode="x">X:<xsl:value-of select="@id"/></xsl:template>
    </xsl:stylesheet>"#;
    let input = r#"<r><item id="1"/><item id="2"/></r>"#;
    assert_eq!(run(stylesheet, input), "id=1id=2X:1X:2");
}

#[test]
fn sorted_for_each_descending_numeric() {
    let stylesheet = r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform" version="1.0">
        <xsl:output omit-xml-declaration="yes"/>
        <xsl:template match="/">
            <xsl:for-each select="r/n">
                <xsl:sort select="." data-type="number" order="descending"/>
                <v><xsl:value-of select="."/></v>
            </xsl:for-each>
        </xsl:template>
    </xsl:stylesheet>"#;
    let input = r#"<r><n>10</n><n>2</n><n>30</n></r>"#;
    assert_eq!(run(stylesheet, input), "<v>30</v><v>10</v><v>2</v>");
}

#[test]
fn attribute_value_built_from_element_and_attribute_instructions() {
    let stylesheet = r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform" version="1.0">
        <xsl:output omit-xml-declaration="yes"/>
        <xsl:template match="/r">
            <xsl:element name="e">
                <xsl:attribute name="a">pre-<xsl:value-of select="@x"/>-post</xsl:attribute>
            </xsl:element>
        </xsl:template>
    </xsl:stylesheet>"#;
    let input = r#"<r x="7"/>"#;
    assert_eq!(run(stylesheet, input), r#"<e a="pre-7-post"/>"#);
}

#[test]
fn recursive_call_template_with_param_accumulates_sum() {
    let stylesheet = r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform" version="1.0">
        <xsl:output omit-xml-declaration="yes"/>
        <xsl:template match="/">
            <xsl:call-template name="sum">
                <xsl:with-param name="n" select="r/@v"/>
            </xsl:call-template>
        </xsl:template>
        <xsl:template name="sum">
            <xsl:param name="n"/>
            <xsl:param name="acc" select="0"/>
            <xsl:choose>
                <xsl:when test="$n = 0">
                    <xsl:value-of select="$acc"/>
                </xsl:when>
                <xsl:otherwise>
                    <xsl:call-template name="sum">
                        <xsl:with-param name="n" select="$n - 1"/>
                        <xsl:with-param name="acc" select="$acc + $n"/>
                    </xsl:call-template>
                </xsl:otherwise>
            </xsl:choose>
        </xsl:template>
    </xsl:stylesheet>"#;
    let input = r#"<r v="5"/>"#;
    assert_eq!(run(stylesheet, input), "15");
}

#[test]
fn format_number_with_negative_subpattern() {
    let stylesheet = r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform" version="1.0">
        <xsl:output omit-xml-declaration="yes"/>
        <xsl:template match="/">
            <xsl:value-of select="format-number(-1234.5, '#,##0.00;(#,##0.00)')"/>
        </xsl:template>
    </xsl:stylesheet>"#;
    let input = "<r/>";
    assert_eq!(run(stylesheet, input), "(1,234.50)");
}

#[test]
fn default_rule_copies_unmatched_text_verbatim() {
    let stylesheet = r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform" version="1.0">
        <xsl:output omit-xml-declaration="yes"/>
        <xsl:template match="/">
            <xsl:apply-templates/>
        </xsl:template>
    </xsl:stylesheet>"#;
    let input = "<r>hello <b>world</b></r>";
    assert_eq!(run(stylesheet, input), "hello world");
}

#[test]
fn if_and_choose_branch_correctly() {
    let stylesheet = r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform" version="1.0">
        <xsl:output omit-xml-declaration="yes"/>
        <xsl:template match="/">
            <xsl:if test="r/@v = '1'">one</xsl:if>
            <xsl:choose>
                <xsl:when test="r/@v = '1'">was-one</xsl:when>
                <xsl:otherwise>was-other</xsl:otherwise>
            </xsl:choose>
        </xsl:template>
    </xsl:stylesheet>"#;
    assert_eq!(run(stylesheet, r#"<r v="1"/>"#), "onewas-one");
    assert_eq!(run(stylesheet, r#"<r v="2"/>"#), "was-other");
}

#[test]
fn variable_bound_from_select_is_visible_to_later_siblings() {
    let stylesheet = r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform" version="1.0">
        <xsl:output omit-xml-declaration="yes"/>
        <xsl:template match="/">
            <xsl:variable name="x" select="r/@v"/>
            <xsl:value-of select="$x"/>
        </xsl:template>
    </xsl:stylesheet>"#;
    assert_eq!(run(stylesheet, r#"<r v="hi"/>"#), "hi");
}

#[test]
fn comment_instruction_emits_a_real_comment_node() {
    let stylesheet = r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform" version="1.0">
        <xsl:output omit-xml-declaration="yes"/>
        <xsl:template match="/">
            <xsl:comment>note</xsl:comment>
        </xsl:template>
    </xsl:stylesheet>"#;
    assert_eq!(run(stylesheet, "<r/>"), "<!--note-->");
}

#[test]
fn matches_function_returns_xpath_string_not_boolean() {
    let stylesheet = r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform" version="1.0">
        <xsl:output omit-xml-declaration="yes"/>
        <xsl:template match="/">
            <xsl:value-of select="concat(matches('abc123', '^[a-z]+\d+$'), '/', matches('abc', '^\d+$'))"/>
        </xsl:template>
    </xsl:stylesheet>"#;
    assert_eq!(run(stylesheet, "<r/>"), "true/false");
}

#[test]
fn xsl_element_with_bare_prefix_resolves_against_input_namespace() {
    let stylesheet = r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform" version="1.0">
        <xsl:output omit-xml-declaration="yes"/>
        <xsl:template match="/r">
            <xsl:element name="p:wrapped"><xsl:value-of select="."/></xsl:element>
        </xsl:template>
    </xsl:stylesheet>"#;
    let input = r#"<r xmlns:p="urn:example:p">hi</r>"#;
    assert_eq!(run(stylesheet, input), r#"<p:wrapped xmlns:p="urn:example:p">hi</p:wrapped>"#);
}

#[test]
fn serialized_output_declares_namespaces_for_literal_result_elements() {
    let stylesheet = r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform" xmlns:out="urn:example:out" version="1.0">
        <xsl:output omit-xml-declaration="yes"/>
        <xsl:template match="/">
            <out:root><out:child>x</out:child></out:root>
        </xsl:template>
    </xsl:stylesheet>"#;
    assert_eq!(
        run(stylesheet, "<r/>"),
        r#"<out:root xmlns:out="urn:example:out"><out:child>x</out:child></out:root>"#
    );
}

#[test]
fn xsl_function_is_callable_from_an_xpath_expression() {
    let stylesheet = r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform" xmlns:fn="urn:example:fn" version="1.0">
        <xsl:output omit-xml-declaration="yes"/>
        <xsl:function name="fn:double">
            <xsl:param name="n"/>
            <xsl:value-of select="$n * 2"/>
        </xsl:function>
        <xsl:template match="/">
            <xsl:value-of select="fn:double(21)"/>
        </xsl:template>
    </xsl:stylesheet>"#;
    assert_eq!(run(stylesheet, "<r/>"), "42");
}

#[test]
fn custom_function_dispatches_through_options() {
    let stylesheet = r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform" xmlns:host="urn:example:host" version="1.0">
        <xsl:output omit-xml-declaration="yes"/>
        <xsl:template match="/">
            <xsl:value-of select="host:shout('hi')"/>
        </xsl:template>
    </xsl:stylesheet>"#;
    let mut custom_functions = std::collections::HashMap::new();
    custom_functions.insert(
        ("urn:example:host".to_string(), "shout".to_string()),
        std::rc::Rc::new(|args: &[String]| args.first().cloned().unwrap_or_default().to_uppercase()) as xslt_core::CustomFunction,
    );
    let options = Options {
        custom_functions,
        ..Options::default()
    };
    let result = transform("<r/>", stylesheet, &ParamMap::new(), &options, &NullFetcher).unwrap();
    assert_eq!(result, "HI");
}

#[test]
fn generate_id_without_args_is_fresh_each_call() {
    let stylesheet = r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform" version="1.0">
        <xsl:output omit-xml-declaration="yes"/>
        <xsl:template match="/">
            <xsl:value-of select="generate-id()"/>/<xsl:value-of select="generate-id()"/>
        </xsl:template>
    </xsl:stylesheet>"#;
    let out = run(stylesheet, "<r/>");
    let (a, b) = out.split_once('/').unwrap();
    assert_ne!(a, b);
    assert_eq!(a.len(), "id".len() + 12);
}

#[test]
fn nested_include_resolves_relative_to_its_own_directory() {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir(root.path().join("sub")).unwrap();
    std::fs::write(
        root.path().join("sub/leaf.xsl"),
        r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform" version="1.0">
            <xsl:template name="greet">leaf</xsl:template>
        </xsl:stylesheet>"#,
    )
    .unwrap();
    std::fs::write(
        root.path().join("sub/middle.xsl"),
        r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform" version="1.0">
            <xsl:include href="leaf.xsl"/>
        </xsl:stylesheet>"#,
    )
    .unwrap();
    let top = r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform" version="1.0">
        <xsl:output omit-xml-declaration="yes"/>
        <xsl:include href="sub/middle.xsl"/>
        <xsl:template match="/">
            <xsl:call-template name="greet"/>
        </xsl:template>
    </xsl:stylesheet>"#;
    let top_path = root.path().join("top.xsl");
    std::fs::write(&top_path, top).unwrap();

    let fetcher = xslt_core::fetch::FileFetcher::new(root.path());
    let options = Options {
        transform_url: Some(top_path.to_string_lossy().into_owned()),
        ..Options::default()
    };
    let result = transform("<r/>", top, &ParamMap::new(), &options, &fetcher).unwrap();
    assert_eq!(result, "leaf");
}
