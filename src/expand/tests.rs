use crate::{
    ExpandOptions, Processor,
    common::{MAGIC_NOWIKI, cookie_index},
    sandbox::{Invocation, ScriptBridge, ScriptError, ScriptHost},
    store::ContentModel,
};
use std::collections::HashSet;

fn processor() -> Processor {
    let _ = env_logger::try_init();
    Processor::new().unwrap()
}

/// Expands `text` on a page named `Tt` and checks the result.
#[track_caller]
fn check(ctx: &mut Processor, text: &str, expected: &str) {
    ctx.start_page("Tt");
    let ret = ctx.expand(text);
    assert_eq!(ret, expected);
    assert_eq!(ctx.expand_stack.len(), 1, "expansion stack not restored");
}

#[track_caller]
fn template(ctx: &mut Processor, name: &str, body: &str) {
    ctx.add_page(ContentModel::Wikitext, &format!("Template:{name}"), body).unwrap();
}

#[test]
fn plain_text_passes_through() {
    let mut ctx = processor();
    check(&mut ctx, "Some text", "Some text");
    check(&mut ctx, "Some [[link]] x", "Some [[link]] x");
    check(&mut ctx, "Some {{{unknown arg}}} x", "Some {{{unknown arg}}} x");
}

#[test]
fn undefined_template_marker() {
    let mut ctx = processor();
    check(
        &mut ctx,
        "Some {{unknown template}} x",
        "Some <strong class=\"error\">Template:unknown template</strong> x",
    );
    assert_eq!(ctx.to_return().errors.len(), 1);
}

#[test]
fn undefined_template_quiet_mode_warns() {
    let mut ctx = processor();
    ctx.start_page("Tt");
    let ret = ctx.expand_with("{{missing}}", &ExpandOptions { quiet: true, ..Default::default() });
    assert!(ret.contains("Template:missing"));
    let messages = ctx.to_return();
    assert!(messages.errors.is_empty());
    assert_eq!(messages.warnings.len(), 1);
}

#[test]
fn substitution_with_defaults() {
    let mut ctx = processor();
    template(&mut ctx, "greet", "Hello {{{1|world}}}!");
    check(&mut ctx, "{{greet}} {{greet|friend}}", "Hello world! Hello friend!");
}

#[test]
fn positional_and_named_arguments() {
    let mut ctx = processor();
    template(&mut ctx, "t", "a{{{1}}}b{{{2}}}c{{{name}}}d");
    check(&mut ctx, "{{t|x|y|name=z}}", "axbyczd");
    // Numeric names decode to positional slots; later definitions win
    check(&mut ctx, "{{t|x|2=y|2=w|name=z}}", "axbwczd");
    // Named argument names and values are whitespace-trimmed
    check(&mut ctx, "{{t|x|y| name = z }}", "axbyczd");
    // Positional values are not trimmed
    template(&mut ctx, "spacey", "[{{{1}}}]");
    check(&mut ctx, "{{spacey| x }}", "[ x ]");
}

#[test]
fn unknown_argument_kept_and_default_expanded() {
    let mut ctx = processor();
    template(&mut ctx, "t", "a{{{x}}}b{{{y|{{{1}}}}}}c");
    check(&mut ctx, "{{t|q}}", "a{{{x}}}bqc");
}

#[test]
fn nested_templates_in_arguments() {
    let mut ctx = processor();
    template(&mut ctx, "str len", "{{str len/core|{{str len/core|{{str len/core|{{{1}}}}}}}}}");
    template(&mut ctx, "str len/core", "{{{1}}}");
    check(&mut ctx, "{{str len|a}}", "a");
}

#[test]
fn link_pipe_does_not_split_arguments() {
    let mut ctx = processor();
    template(&mut ctx, "foo", "a{{{1}}}b");
    check(&mut ctx, "{{foo|[[a|b]]}}", "a[[a|b]]b");
}

#[test]
fn html_pipe_does_not_split_arguments() {
    let mut ctx = processor();
    template(&mut ctx, "foo", "a{{{1}}}b");
    check(&mut ctx, "{{foo|x <math> 1 | 2 </math> y}}", "ax <math> 1 | 2 </math> yb");
    check(
        &mut ctx,
        "{{foo|<span class=\"foo\">bar</span>}}",
        "a<span class=\"foo\">bar</span>b",
    );
}

#[test]
fn subst_prefixes_are_stripped() {
    let mut ctx = processor();
    template(&mut ctx, "greet", "hi");
    check(&mut ctx, "{{subst:greet}}", "hi");
    check(&mut ctx, "{{safesubst:greet}}", "hi");
}

#[test]
fn multibyte_names_at_prefix_boundaries() {
    // A multi-byte character straddling the subst:/safesubst: prefix
    // lengths must not break name resolution
    let mut ctx = processor();
    template(&mut ctx, "123456789°", "deg10");
    template(&mut ctx, "12345°", "deg6");
    check(&mut ctx, "{{123456789°}}", "deg10");
    check(&mut ctx, "{{12345°}}", "deg6");
}

#[test]
fn predefined_escape_templates() {
    let mut ctx = processor();
    template(&mut ctx, "row", "a{{!}}b");
    check(&mut ctx, "{{row}}", "a|b");
    check(&mut ctx, "{{((}}x{{))}}", "&lbrace;&lbrace;x&rbrace;&rbrace;");
}

#[test]
fn direct_template_loop() {
    let mut ctx = processor();
    template(&mut ctx, "foo", "a{{foo}}b");
    check(
        &mut ctx,
        "{{foo}}",
        "a<strong class=\"error\">Template loop detected: [[:Template:foo]]</strong>b",
    );
}

#[test]
fn indirect_template_loop() {
    let mut ctx = processor();
    template(&mut ctx, "a", "x{{b}}y");
    template(&mut ctx, "b", "{{a}}");
    ctx.start_page("Tt");
    let ret = ctx.expand("{{a}}");
    assert!(ret.contains("Template loop detected: [[:Template:a]]"), "got {ret:?}");
}

#[test]
fn nowiki_survives_expansion() {
    let mut ctx = processor();
    template(&mut ctx, "not a template", "EXPANDED");
    check(
        &mut ctx,
        "<nowiki>{{not a template}}</nowiki>",
        "&lbrace;&lbrace;not a template&rbrace;&rbrace;",
    );
}

#[test]
fn nowiki_entity_quoting() {
    let mut ctx = processor();
    check(
        &mut ctx,
        "<nowiki>a=<>*#:!|[]{}\"'b</nowiki>",
        "a&equals;&lt;&gt;&ast;&num;&colon;&excl;&vert;&lsqb;&rsqb;&lbrace;&rbrace;&quot;&apos;b",
    );
    // Entities inside nowiki are decoded once, then re-quoted
    check(&mut ctx, "a<nowiki>&amp;</nowiki>b", "a&amp;b");
    check(&mut ctx, " <nowiki>a\nb\nc</nowiki>", " a\nb\nc");
}

#[test]
fn self_closing_nowiki_round_trips() {
    let mut ctx = processor();
    check(&mut ctx, "a<nowiki />b", "a<nowiki />b");
    // A nowiki inside a construct makes it literal
    check(&mut ctx, "{{x<nowiki />}}", "&lbrace;&lbrace;x<nowiki />&rbrace;&rbrace;");
}

#[test]
fn no_reserved_codepoints_after_finalize(){
    let mut ctx = processor();
    template(&mut ctx, "t", "{{{1|d}}}");
    ctx.start_page("Tt");
    let ret = ctx.expand("a {{t}} [x y] [[l|t]] <nowiki>{{z}}</nowiki> {{{arg}}}");
    assert!(ret.chars().all(|c| cookie_index(c).is_none()), "residual cookies in {ret:?}");
    assert!(!ret.contains(MAGIC_NOWIKI));
}

#[test]
fn expansion_is_idempotent_on_expanded_text() {
    let mut ctx = processor();
    template(&mut ctx, "t", "X{{{1|}}}Y");
    ctx.start_page("Tt");
    let once = ctx.expand("a {{t|b}} c [[link|text]] '''bold'''");
    ctx.start_page("Tt");
    let twice = ctx.expand(&once);
    assert_eq!(once, twice);
}

#[test]
fn recursion_depth_is_bounded() {
    let mut ctx = processor();
    // Each level passes through one more template expansion without being
    // a loop: a self-recursive template with a changing argument still
    // triggers loop detection, so chain distinct names instead
    for i in 0..120 {
        template(&mut ctx, &format!("t{i}"), &format!("{{{{t{}}}}}", i + 1));
    }
    ctx.start_page("Tt");
    let ret = ctx.expand("{{t0}}");
    assert!(ret.contains("too deep recursion"), "got {ret:?}");
}

#[test]
fn pre_expand_only_expands_flagged_templates() {
    let mut ctx = processor();
    template(&mut ctx, "listy", "* item");
    template(&mut ctx, "plain", "nothing special");
    ctx.analyze_templates();
    ctx.start_page("Tt");
    let ret = ctx.expand_with(
        "{{listy}} and {{plain|x}}",
        &ExpandOptions { pre_expand: true, ..Default::default() },
    );
    assert_eq!(ret, "\n* item and {{plain|x}}");
}

#[test]
fn templates_to_expand_limits_expansion() {
    let mut ctx = processor();
    template(&mut ctx, "a", "A");
    template(&mut ctx, "b", "B");
    let mut only = HashSet::new();
    only.insert("a".to_string());
    ctx.start_page("Tt");
    let ret = ctx.expand_with(
        "{{a}}{{b}}",
        &ExpandOptions { templates_to_expand: Some(&only), ..Default::default() },
    );
    assert_eq!(ret, "A{{b}}");
}

#[test]
fn no_parserfns_flag() {
    let mut ctx = processor();
    ctx.start_page("Tt");
    let ret = ctx.expand_with(
        "{{#expr: 1 + 1}}",
        &ExpandOptions { no_parserfns: true, ..Default::default() },
    );
    assert_eq!(ret, "{{#expr: 1 + 1}}");
}

#[test]
fn template_fn_hook_overrides() {
    let mut ctx = processor();
    template(&mut ctx, "t", "body");
    ctx.start_page("Tt");
    let hook = |name: &str, _args: &crate::FrameArgs| -> Option<String> {
        (name == "t").then(|| "HOOKED".to_string())
    };
    let ret =
        ctx.expand_with("{{t}}", &ExpandOptions { template_fn: Some(&hook), ..Default::default() });
    assert_eq!(ret, "HOOKED");
}

#[test]
fn post_template_fn_hook_observes() {
    let mut ctx = processor();
    template(&mut ctx, "t", "body");
    ctx.start_page("Tt");
    let hook = |_name: &str, _args: &crate::FrameArgs, expanded: &str| -> Option<String> {
        Some(format!("[{expanded}]"))
    };
    let ret = ctx.expand_with(
        "{{t}}",
        &ExpandOptions { post_template_fn: Some(&hook), ..Default::default() },
    );
    assert_eq!(ret, "[body]");
}

// ---------------------------------------------------------------------------
// Parser functions through the full pipeline

#[test]
fn if_family() {
    let mut ctx = processor();
    check(&mut ctx, "{{#if:|T|F}}", "F");
    check(&mut ctx, "{{#if: |T|F}}", "F");
    check(&mut ctx, "{{#if:x|T|F}}", "T");
    check(&mut ctx, "{{#if:x|T}}", "T");
    check(&mut ctx, "{{#if:|T}}", "");
    check(&mut ctx, "{{#ifeq:a|a|T|F}}", "T");
    check(&mut ctx, "{{#ifeq: a | a |T|F}}", "T");
    check(&mut ctx, "{{#ifeq:a|b|T|F}}", "F");
    check(&mut ctx, "{{#ifexist:no such page|T|F}}", "F");
}

#[test]
fn ifexist_finds_stored_pages() {
    let mut ctx = processor();
    ctx.add_page(ContentModel::Wikitext, "Water", "wet").unwrap();
    check(&mut ctx, "{{#ifexist:Water|T|F}}", "T");
}

#[test]
fn iferror_detects_markers() {
    let mut ctx = processor();
    check(&mut ctx, "{{#iferror:{{#expr:1+1}}|bad|good}}", "good");
    check(&mut ctx, "{{#iferror:{{#expr:1+X}}|bad|good}}", "bad");
    check(&mut ctx, "{{#iferror:{{#expr:1+1}}}}", "2");
    check(&mut ctx, "{{#iferror:{{#expr:1+X}}}}", "");
}

#[test]
fn switch_matching() {
    let mut ctx = processor();
    check(&mut ctx, "{{#switch:b|a=A|b=B|c=C}}", "B");
    check(&mut ctx, "{{#switch:x|a=A|b=B|#default=D}}", "D");
    check(&mut ctx, "{{#switch:x|a=A|b=B}}", "");
    // Fall-through: a bare case matches the next valued case
    check(&mut ctx, "{{#switch:a|a|b=AB|c=C}}", "AB");
    // A trailing bare case is the result when it matches nothing else
    check(&mut ctx, "{{#switch:z|a=A|last}}", "last");
}

#[test]
fn expr_arithmetic() {
    let mut ctx = processor();
    check(&mut ctx, "{{#expr: 2 + 3 * 4}}", "14");
    check(&mut ctx, "{{#expr: (2+3)*4}}", "20");
    check(&mut ctx, "{{#expr: .}}", "0");
    check(&mut ctx, "{{#expr: 1/0}}", "Divide by zero");
    check(&mut ctx, "{{#expr: 10 mod 3}}", "1");
    check(&mut ctx, "{{#expr: 2^8}}", "256");
    check(&mut ctx, "{{#ifexpr: 1+1=2 | yes | no}}", "yes");
    check(&mut ctx, "{{#ifexpr: 1>2 | yes | no}}", "no");
    check(&mut ctx, "{{#ifexpr: 2 | yes | no}}", "yes");
    // Only an integral result is truthy; fractions and errors are false
    check(&mut ctx, "{{#ifexpr: 1/2 | yes | no}}", "no");
    check(&mut ctx, "{{#ifexpr: 2.5 | yes | no}}", "no");
    check(&mut ctx, "{{#ifexpr: 1/0 | yes | no}}", "no");
    ctx.start_page("Tt");
    let ret = ctx.expand("{{#expr: 1 + bogus}}");
    assert!(ret.starts_with("<strong class=\"error\">Expression error near"), "got {ret:?}");
}

#[test]
fn string_functions() {
    let mut ctx = processor();
    check(&mut ctx, "{{lc:ABC}}", "abc");
    check(&mut ctx, "{{uc:abc}}", "ABC");
    check(&mut ctx, "{{lcfirst:ABC}}", "aBC");
    check(&mut ctx, "{{ucfirst:abc}}", "Abc");
    check(&mut ctx, "{{#len:hello}}", "5");
    check(&mut ctx, "{{#pos:hello|l}}", "2");
    check(&mut ctx, "{{#pos:hello|z}}", "");
    check(&mut ctx, "{{#rpos:hello|l}}", "3");
    check(&mut ctx, "{{#rpos:hello|z}}", "-1");
    check(&mut ctx, "{{#sub:hello|1|3}}", "ell");
    check(&mut ctx, "{{#sub:hello|-3}}", "llo");
    check(&mut ctx, "{{#sub:hello|1}}", "ello");
    check(&mut ctx, "{{#replace:a b a|a|c}}", "c b c");
    check(&mut ctx, "{{#explode:a/b/c|/|1}}", "b");
    check(&mut ctx, "{{#explode:a/b/c|/|-1}}", "c");
    check(&mut ctx, "{{padleft:7|3}}", "007");
    check(&mut ctx, "{{padright:7|3|x}}", "7xx");
    check(&mut ctx, "{{#pad:7|3|0|right}}", "700");
}

#[test]
fn formatnum_grouping() {
    let mut ctx = processor();
    check(&mut ctx, "{{formatnum:987654321.654321}}", "987,654,321.654321");
    check(&mut ctx, "{{formatnum:9.6}}", "9.6");
    check(&mut ctx, "{{formatnum:123}}", "123");
    check(&mut ctx, "{{formatnum:1234}}", "1,234");
    check(&mut ctx, "{{formatnum:00001}}", "00,001");
    check(&mut ctx, "{{formatnum:1234.778|NOSEP}}", "1234.778");
    check(&mut ctx, "{{formatnum:1,000,001.07|R}}", "1000001.07");
}

#[test]
fn url_functions() {
    let mut ctx = processor();
    check(&mut ctx, "{{urlencode:x:y/z k}}", "x%3Ay%2Fz+k");
    check(&mut ctx, "{{urlencode:x:y/z kä|QUERY}}", "x%3Ay%2Fz+k%C3%A4");
    check(&mut ctx, "{{urlencode:x:y/z kä|WIKI}}", "x:y/z_k%C3%A4");
    check(&mut ctx, "{{urlencode:x:y/z kä|PATH}}", "x%3Ay%2Fz%20k%C3%A4");
    check(&mut ctx, "{{#urldecode:x%3Ay%2Fz+k}}", "x:y/z k");
    check(&mut ctx, "{{anchorencode:x:y/z kä}}", "x:y/z_kä");
    check(&mut ctx, "{{fullurl:Test page|action=edit}}", "//dummy.host/wiki/Test_page?action=edit");
    check(&mut ctx, "{{localurl:Test page}}", "/wiki/Test_page");
}

#[test]
fn namespace_functions() {
    let mut ctx = processor();
    check(&mut ctx, "{{ns:6}}", "File");
    check(&mut ctx, "{{ns:File}}", "File");
    check(&mut ctx, "{{ns:Image}}", "File");
    check(&mut ctx, "{{ns:Nonexistentns}}", "");
    check(&mut ctx, "{{NAMESPACE:Template:foo}}", "Template");
    check(&mut ctx, "{{NAMESPACE}}", "");
    check(&mut ctx, "{{SERVERNAME}}", "dummy.host");
    check(&mut ctx, "{{SERVER}}", "//dummy.host");
}

#[test]
fn pagename_functions() {
    let mut ctx = processor();
    ctx.start_page("Help:foo/bar/baz");
    assert_eq!(ctx.expand("{{PAGENAME}}"), "foo/bar/baz");
    assert_eq!(ctx.expand("{{FULLPAGENAME}}"), "Help:foo/bar/baz");
    assert_eq!(ctx.expand("{{BASEPAGENAME}}"), "foo/bar");
    assert_eq!(ctx.expand("{{ROOTPAGENAME}}"), "foo");
    assert_eq!(ctx.expand("{{SUBPAGENAME}}"), "baz");
    ctx.start_page("Tt");
    assert_eq!(ctx.expand("{{TALKPAGENAME}}"), "Talk:Tt");
    ctx.start_page("Template:Tt");
    assert_eq!(ctx.expand("{{TALKPAGENAME}}"), "Template_talk:Tt");
}

#[test]
fn titleparts_slicing() {
    let mut ctx = processor();
    check(&mut ctx, "{{#titleparts:foo}}", "foo");
    check(&mut ctx, "{{#titleparts:foo/bar/baz}}", "foo/bar/baz");
    check(&mut ctx, "{{#titleparts:Help:foo/bar/baz}}", "Help:foo/bar/baz");
    check(&mut ctx, "{{#titleparts:foo|1|-1}}", "foo");
    check(&mut ctx, "{{#titleparts:foo/bar/baz|1|-2}}", "bar");
    check(&mut ctx, "{{#titleparts:Help:foo/bar/baz|2|1}}", "foo/bar");
    check(&mut ctx, "{{#titleparts:Help:foo/bar/baz||-2}}", "bar/baz");
    check(&mut ctx, "{{#titleparts:Help:foo/bar/baz|2}}", "Help:foo");
}

#[test]
fn time_formatting() {
    let mut ctx = processor();
    check(&mut ctx, "{{#time:Y|January 3, 1999}}", "1999");
    check(&mut ctx, "{{#time:y|January 3, 1999}}", "99");
    check(&mut ctx, "{{#time:L|January 3, 1999}}", "0");
    check(&mut ctx, "{{#time:L|January 3, 2004}}", "1");
    check(&mut ctx, "{{#time:n|February 7, 2007}}", "2");
    check(&mut ctx, "{{#time:m|February 7, 2007}}", "02");
    check(&mut ctx, "{{#time:j|February 7, 2007}}", "7");
    check(&mut ctx, "{{#time:d|February 7, 2007}}", "07");
    check(&mut ctx, "{{#time:M|February 7, 2007|en}}", "Feb");
    check(&mut ctx, "{{#time:F|February 7, 2007|en}}", "February");
    check(&mut ctx, "{{#time:Yxgd \"(foo)\"|February 7, 2007|en}}", "2007February07 (foo)");
    check(&mut ctx, "{{#time:N|February 4, 2007}}", "7");
    check(&mut ctx, "{{#time:l|February 4, 2007|en}}", "Sunday");
    ctx.start_page("Tt");
    let ret = ctx.expand("{{#time:Y|gibberish}}");
    assert!(ret.contains("Bad time syntax"), "got {ret:?}");
}

#[test]
fn tag_builds_extension_tags() {
    let mut ctx = processor();
    check(&mut ctx, "{{#tag:ref|content}}", "<ref>content</ref>");
    check(&mut ctx, "{{#tag:span|x|class=big}}", "<span class=\"big\">x</span>");
    check(&mut ctx, "{{#tag:nowiki|a=b}}", "a&equals;b");
    ctx.start_page("Tt");
    let ret = ctx.expand("{{#tag:script|evil}}");
    assert_eq!(ret, "{{#tag:script|evil}}");
    assert_eq!(ctx.to_return().warnings.len(), 1);
}

#[test]
fn lst_extracts_sections() {
    let mut ctx = processor();
    ctx.add_page(
        ContentModel::Wikitext,
        "Source",
        "a<section begin=x/>ONE<section end=x/>b<section begin=x/>TWO<section end=x/>c",
    )
    .unwrap();
    check(&mut ctx, "{{#lst:Source|x}}", "ONETWO");
    ctx.start_page("Tt");
    assert_eq!(ctx.expand("{{#lst:Source|missing}}"), "");
    assert_eq!(ctx.to_return().warnings.len(), 1);
    ctx.start_page("Tt");
    assert_eq!(ctx.expand("{{#lst:No page|x}}"), "");
    assert_eq!(ctx.to_return().warnings.len(), 1);
}

#[test]
fn unknown_parser_function_is_error() {
    let mut ctx = processor();
    ctx.start_page("Tt");
    let ret = ctx.expand("{{#nosuchfunction:x}}");
    assert_eq!(ret, "");
    assert_eq!(ctx.to_return().errors.len(), 1);
}

#[test]
fn categorytree_is_ignored() {
    let mut ctx = processor();
    check(&mut ctx, "{{#categorytree:Foo|depth=2}}", "");
}

// ---------------------------------------------------------------------------
// Script invocation through a test host

/// A minimal script host standing in for the embedded runtime.
struct TestHost;

impl ScriptHost for TestHost {
    fn invoke(
        &mut self,
        bridge: &mut dyn ScriptBridge,
        call: &Invocation<'_>,
    ) -> Result<String, ScriptError> {
        match (call.module, call.function) {
            ("testmod", "testfn") => {
                // return frame:getParent().args[1]
                Ok(call
                    .frame
                    .get_parent()
                    .and_then(|parent| parent.get_argument("1"))
                    .unwrap_or_default()
                    .to_string())
            }
            ("testmod", "ownarg") => {
                Ok(call.frame.get_argument("1").unwrap_or_default().to_string())
            }
            ("testmod", "title") => Ok(call.frame.title.clone()),
            ("testmod", "pagetitle") => Ok(call.page_title.to_string()),
            ("link", "full_link") => Ok(bridge.preprocess(&call.frame, "{{m}}")),
            ("testmod", "expandtemplate") => {
                let mut args = crate::FrameArgs::default();
                args.insert(crate::ArgKey::Pos(1), "arg".to_string());
                Ok(bridge.expand_template(&call.frame, "wrapped", &args))
            }
            ("testmod", "parserfn") => {
                Ok(bridge.call_parser_function("#expr", vec!["2*21".to_string()]))
            }
            ("testmod", "exttag") => {
                Ok(bridge.extension_tag(&call.frame, "ref", "content", &[]))
            }
            ("testmod", "loader") => {
                Ok(bridge.module_source("testmod").unwrap_or_else(|| "MISSING".to_string()))
            }
            ("testmod", "timeouts") => Err(ScriptError::Timeout),
            ("testmod", "usererror") => Err(ScriptError::User("deliberate".to_string())),
            ("testmod", "crashes") => Err(ScriptError::Runtime("stack traceback: boom".to_string())),
            (module, function) => {
                Err(ScriptError::FunctionNotFound(format!("{module}:{function}")))
            }
        }
    }

    fn reset(&mut self) {}
}

fn scripted() -> Processor {
    let mut ctx = processor();
    ctx.set_script_host(Box::new(TestHost));
    ctx
}

#[test]
fn invoke_with_parent_frame() {
    let mut ctx = scripted();
    template(&mut ctx, "wrap", "{{#invoke:testmod|testfn}}");
    check(&mut ctx, "{{wrap|hello}}", "hello");
}

#[test]
fn invoke_own_arguments() {
    let mut ctx = scripted();
    check(&mut ctx, "{{#invoke:testmod|ownarg|direct}}", "direct");
    check(&mut ctx, "{{#invoke:testmod|ownarg|1=named}}", "named");
}

#[test]
fn invoke_frame_titles() {
    let mut ctx = scripted();
    check(&mut ctx, "{{#invoke:testmod|title}}", "Module:testmod");
    check(&mut ctx, "{{#invoke:testmod|pagetitle}}", "Tt");
}

#[test]
fn invoke_loop_detection_through_preprocess() {
    let mut ctx = scripted();
    template(&mut ctx, "m", "{{#invoke:link|full_link}}");
    ctx.start_page("Tt");
    let ret = ctx.expand("{{m}}");
    assert!(
        ret.contains("Template loop detected: [[:Template:m]]"),
        "got {ret:?}"
    );
}

#[test]
fn invoke_expand_template_bridge() {
    let mut ctx = scripted();
    template(&mut ctx, "wrapped", "W{{{1}}}W");
    check(&mut ctx, "{{#invoke:testmod|expandtemplate}}", "WargW");
}

#[test]
fn invoke_parser_function_bridge() {
    let mut ctx = scripted();
    check(&mut ctx, "{{#invoke:testmod|parserfn}}", "42");
}

#[test]
fn invoke_extension_tag_bridge() {
    let mut ctx = scripted();
    check(&mut ctx, "{{#invoke:testmod|exttag}}", "<ref>content</ref>");
}

#[test]
fn invoke_module_loader() {
    let mut ctx = scripted();
    ctx.add_page(ContentModel::ScriptModule, "Module:testmod", "return {}").unwrap();
    check(&mut ctx, "{{#invoke:testmod|loader}}", "return {}");
}

#[test]
fn invoke_timeout_marker() {
    let mut ctx = scripted();
    ctx.start_page("Tt");
    let ret = ctx.expand("{{#invoke:testmod|timeouts}}");
    assert_eq!(ret, "<strong class=\"error\">Timeout in testmod:timeouts</strong>");
    assert_eq!(ctx.to_return().errors.len(), 1);
}

#[test]
fn invoke_user_error_is_warning() {
    let mut ctx = scripted();
    ctx.start_page("Tt");
    assert_eq!(ctx.expand("{{#invoke:testmod|usererror}}"), "");
    let messages = ctx.to_return();
    assert!(messages.errors.is_empty());
    assert_eq!(messages.warnings.len(), 1);
}

#[test]
fn invoke_runtime_error_is_error() {
    let mut ctx = scripted();
    ctx.start_page("Tt");
    assert_eq!(ctx.expand("{{#invoke:testmod|crashes}}"), "");
    assert_eq!(ctx.to_return().errors.len(), 1);
}

#[test]
fn invoke_without_host_is_error() {
    let mut ctx = processor();
    ctx.start_page("Tt");
    assert_eq!(ctx.expand("{{#invoke:testmod|testfn}}"), "");
    assert_eq!(ctx.to_return().errors.len(), 1);
}

#[test]
fn invoke_argument_sees_caller_as_parent() {
    // A script invocation inside a template argument is expanded in the
    // calling frame, so its parent is the caller, not the template being
    // called
    let mut ctx = scripted();
    template(&mut ctx, "outer", "O{{inner|{{#invoke:testmod|testfn}}}}O");
    template(&mut ctx, "inner", "I{{{1}}}I");
    check(&mut ctx, "{{outer|seen}}", "OIseenIO");
}
